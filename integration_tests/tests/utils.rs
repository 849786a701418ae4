#![allow(dead_code)]
use canhouse_common::{device_config::DeviceConfig, messages::HouseMessage};
use canhouse_node::{provision::provision, storage::EepromStore};
use integration_tests::{sim_bus::SimBusReceiver, sim_hw::SimEeprom};

/// Bytes of data EEPROM on the house boards
pub const EEPROM_SIZE: usize = 256;

/// Create an EEPROM backed store provisioned from a device config
pub fn provisioned_store(config_toml: &str) -> EepromStore<SimEeprom> {
    let config = DeviceConfig::load_from_str(config_toml).unwrap();
    let mut store = EepromStore::new(SimEeprom::new(EEPROM_SIZE));
    provision(&mut store, &config).unwrap();
    store
}

pub struct BusLogger {
    rx: SimBusReceiver,
}

impl BusLogger {
    pub fn new(rx: SimBusReceiver) -> Self {
        Self { rx }
    }

    pub fn print(&mut self) {
        println!("Bus message history");
        println!("-------------------");
        while let Some(msg) = self.rx.try_recv() {
            let parsed_msg: Result<HouseMessage, _> = msg.try_into();

            if let Ok(msg) = parsed_msg {
                println!("{:?}", msg);
            } else {
                println!("{:?}", msg);
            }
        }
    }
}

impl Drop for BusLogger {
    fn drop(&mut self) {
        self.print();
    }
}
