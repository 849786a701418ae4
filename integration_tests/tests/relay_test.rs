use canhouse_common::{
    constants::FIRMWARE_VERSION,
    mapping_dump::{MappingDumpReader, TERMINATOR},
    messages::{
        ComplexRequest, HouseMessage, MappingUpdate, MappingsRequest, Operation, SwitchEvent,
    },
    traits::{CanTransport, ErrorCounters},
    Floor,
};
use canhouse_node::{output::PortBank, storage::EepromStore, Relay, RelayMbox};
use integration_tests::{sim_bus::SimBus, sim_hw::SimEeprom};

mod utils;
use utils::{provisioned_store, BusLogger};

const GROUND_RELAY: &str = r#"
role = "relay"
floor = "ground"
mappings = [
    { node_id = 5, output = 3 },
    { node_id = 6, output = 1 },
]
"#;

fn ground_relay_store() -> EepromStore<SimEeprom> {
    provisioned_store(GROUND_RELAY)
}

fn tick(mbox: &RelayMbox, n: usize) {
    for _ in 0..n {
        mbox.tick();
    }
}

#[test]
fn test_button_press_toggles_output() {
    let mbox = RelayMbox::new();
    let mut store = ground_relay_store();
    let mut outputs = PortBank::new();
    let mut relay = Relay::boot(&mbox, &store).unwrap();

    let mut bus = SimBus::new();
    let mut transport = bus.attach(&mbox);
    let mut tool = bus.new_sender();
    let _logger = BusLogger::new(bus.new_receiver());
    relay.configure(&mut transport);
    assert_eq!(relay.filters().to_vec(), transport.filters());

    tick(&mbox, 2);
    let press = SwitchEvent {
        node_id: 5,
        pressed: true,
    };
    tool.send(press.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert!(outputs.is_on(3));

    // A bounce inside the debounce window is ignored
    tick(&mbox, 1);
    tool.send(press.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert!(outputs.is_on(3));

    tick(&mbox, 1);
    tool.send(press.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert!(!outputs.is_on(3));
}

#[test]
fn test_other_floor_is_filtered() {
    let mbox = RelayMbox::new();
    let mut store = ground_relay_store();
    let mut outputs = PortBank::new();
    let mut relay = Relay::boot(&mbox, &store).unwrap();

    let mut bus = SimBus::new();
    let mut transport = bus.attach(&mbox);
    let mut tool = bus.new_sender();
    relay.configure(&mut transport);

    tick(&mbox, 2);
    let request = ComplexRequest {
        node_id: 0x80,
        operation: Operation::On,
    };
    tool.send(request.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert_eq!(PortBank::new(), outputs);
}

#[test]
fn test_floor_operations_and_status() {
    let mbox = RelayMbox::new();
    let mut store = ground_relay_store();
    let mut outputs = PortBank::new();
    let mut relay = Relay::boot(&mbox, &store).unwrap();

    let mut bus = SimBus::new();
    let mut transport = bus.attach(&mbox);
    transport.set_error_counters(ErrorCounters { tx: 7, rx: 9 });
    let mut tool = bus.new_sender();
    let mut rx = bus.new_receiver();
    relay.configure(&mut transport);

    tool.send(
        ComplexRequest {
            node_id: 0,
            operation: Operation::On,
        }
        .into(),
    )
    .unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert!((1..=3).all(|n| outputs.is_on(n)));
    assert!(!outputs.is_on(4));

    tool.send(
        ComplexRequest {
            node_id: 0,
            operation: Operation::Get,
        }
        .into(),
    )
    .unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);

    // The request itself, then the reply
    let frames = rx.drain();
    assert_eq!(3, frames.len());
    let Ok(HouseMessage::StatusReply(reply)) = HouseMessage::try_from(frames[2]) else {
        panic!("Expected a status reply, got {:?}", frames[2]);
    };
    assert_eq!(0, reply.floor_value);
    assert_eq!(3, reply.snapshot.used_outputs);
    assert!((1..=3).all(|n| reply.snapshot.is_on(n)));
    assert_eq!((7, 9), (reply.tx_errors, reply.rx_errors));
    assert_eq!(FIRMWARE_VERSION, reply.firmware_version);
}

#[test]
fn test_mapping_update_survives_reboot() {
    let mbox = RelayMbox::new();
    let mut store = ground_relay_store();
    let mut outputs = PortBank::new();
    let mut relay = Relay::boot(&mbox, &store).unwrap();

    let mut bus = SimBus::new();
    let mut transport = bus.attach(&mbox);
    let mut tool = bus.new_sender();
    relay.configure(&mut transport);

    let update = MappingUpdate {
        floor_value: 0,
        slot: 3,
        node_id: 0x21,
        output_number: 12,
    };
    tool.send(update.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);
    assert_eq!(3, relay.engine().len());
    drop(relay);
    drop(transport);

    // Reboot from the same EEPROM
    let mbox = RelayMbox::new();
    let mut relay = Relay::boot(&mbox, &store).unwrap();
    assert_eq!(Floor::Ground, relay.floor());
    assert_eq!(12, relay.engine().used_output_count());

    let mut bus = SimBus::new();
    let mut transport = bus.attach(&mbox);
    let mut tool = bus.new_sender();
    let mut rx = bus.new_receiver();
    relay.configure(&mut transport);

    tool.send(MappingsRequest { floor_value: 0 }.into()).unwrap();
    relay.process(&mut transport, &mut store, &mut outputs);

    let mut reader = MappingDumpReader::new();
    let mut pairs = Vec::new();
    for frame in rx.drain() {
        if let Ok(HouseMessage::MappingsReply(reply)) = HouseMessage::try_from(frame) {
            assert_eq!(Floor::Ground.value(), reply.floor_value);
            reader.feed(&reply.data[..reply.len as usize], |_, _| {});
            pairs.extend(reply.pairs());
        }
    }
    assert!(reader.is_complete());
    assert_eq!(Some(TERMINATOR), pairs.pop());
    assert_eq!(vec![(5, 3), (6, 1), (0x21, 12)], pairs);
}

#[test]
fn test_relay_refuses_blank_storage() {
    let mbox = RelayMbox::new();
    let store = EepromStore::new(SimEeprom::new(utils::EEPROM_SIZE));
    assert!(Relay::boot(&mbox, &store).is_err());
}
