//! The relay node
//!
//! A relay drives up to 30 outputs on one floor. Button presses (NORMAL frames) toggle the output
//! mapped to the pressed button, COMPLEX frames switch one output or every used output, and
//! CONFIG and MAPPINGS frames addressed to the relay's floor value edit and dump its mapping
//! table.
//!
//! Received frames are stored into a [`RelayMbox`] from the CAN receive interrupt, and
//! [`Relay::process`] is called from the main loop to act on them.

use core::cell::RefCell;
use core::cmp::Ordering;

use canhouse_common::constants::buckets;
use canhouse_common::filter::AcceptanceFilter;
use canhouse_common::mapping_dump::MappingDumpWriter;
use canhouse_common::messages::{
    CanMessage, ComplexRequest, HouseMessage, MappingUpdate, MappingsRequest, MessageClass,
    Operation, StatusReply,
};
use canhouse_common::traits::{CanTransport, DataItem, KeyValueStore};
use canhouse_common::{AtomicCell, Floor};
use critical_section::Mutex;
use defmt_or_log::{debug, info, warn};
use heapless::Deque;

use crate::mapping::{MappingEngine, Ticks};
use crate::output::{lookup_output, DigitalOutput, Output};
use crate::BootError;

/// Number of operations which can wait for [`Relay::process`]
pub const OPERATION_QUEUE_DEPTH: usize = 8;

/// Data shared between the CAN receive interrupt, the quarter second timer interrupt and the
/// [`Relay`]
///
/// Operations are queued in arrival order. Mapping updates and dump requests have a single slot;
/// a newer one replaces an unprocessed one.
#[allow(missing_debug_implementations)]
pub struct RelayMbox {
    operations: Mutex<RefCell<Deque<ComplexRequest, OPERATION_QUEUE_DEPTH>>>,
    mapping_update: AtomicCell<Option<MappingUpdate>>,
    mappings_request: AtomicCell<Option<MappingsRequest>>,
    ticks: AtomicCell<Ticks>,
    notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl Default for RelayMbox {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMbox {
    /// Create a new RelayMbox
    pub const fn new() -> Self {
        Self {
            operations: Mutex::new(RefCell::new(Deque::new())),
            mapping_update: AtomicCell::new(None),
            mappings_request: AtomicCell::new(None),
            ticks: AtomicCell::new(0),
            notify_cb: AtomicCell::new(None),
        }
    }

    /// Set a callback for notification when a message is received and requires processing.
    ///
    /// It must be static. Usually this will be a static fn, but in some circumstances, it may be
    /// desirable to use Box::leak to pass a heap allocated closure instead.
    pub fn set_process_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.notify_cb.store(Some(callback));
    }

    fn notify(&self) {
        if let Some(notify_cb) = self.notify_cb.load() {
            notify_cb();
        }
    }

    /// Advance the clock by one quarter second. Call from the timer interrupt.
    pub fn tick(&self) {
        let _ = self.ticks.fetch_update(|t| Some(t.wrapping_add(1)));
    }

    /// Quarter seconds since boot
    pub fn now(&self) -> Ticks {
        self.ticks.load()
    }

    pub(crate) fn take_operation(&self) -> Option<ComplexRequest> {
        critical_section::with(|cs| self.operations.borrow_ref_mut(cs).pop_front())
    }

    fn queue_operation(&self, request: ComplexRequest) -> bool {
        critical_section::with(|cs| self.operations.borrow_ref_mut(cs).push_back(request).is_ok())
    }

    pub(crate) fn take_mapping_update(&self) -> Option<MappingUpdate> {
        self.mapping_update.take()
    }

    pub(crate) fn take_mappings_request(&self) -> Option<MappingsRequest> {
        self.mappings_request.take()
    }

    /// Store a received CAN message
    ///
    /// Frames the relay has no use for are handed back in the `Err`, as are operations arriving
    /// while the operation queue is full.
    pub fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        let message = match HouseMessage::try_from(msg) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed frame 0x{:x}: {:?}", msg.id(), e);
                return Err(msg);
            }
        };

        match message {
            HouseMessage::SwitchEvent(event) => {
                let request = ComplexRequest {
                    node_id: event.node_id,
                    operation: Operation::Toggle,
                };
                if !self.queue_operation(request) {
                    warn!("Operation queue full, dropping frame 0x{:x}", msg.id());
                    return Err(msg);
                }
            }
            HouseMessage::Complex(request) => {
                if !self.queue_operation(request) {
                    warn!("Operation queue full, dropping frame 0x{:x}", msg.id());
                    return Err(msg);
                }
            }
            HouseMessage::MappingUpdate(update) => self.mapping_update.store(Some(update)),
            HouseMessage::MappingsRequest(request) => self.mappings_request.store(Some(request)),
            _ => return Err(msg),
        }
        self.notify();
        Ok(())
    }
}

/// A relay serving one floor
#[allow(missing_debug_implementations)]
pub struct Relay<'a> {
    mbox: &'a RelayMbox,
    floor: Floor,
    engine: MappingEngine,
}

impl<'a> Relay<'a> {
    /// Load the floor and the mapping table from storage
    ///
    /// The floor is mandatory; without it the relay must not start.
    pub fn boot(mbox: &'a RelayMbox, store: &dyn KeyValueStore) -> Result<Self, BootError> {
        let item = DataItem::load(store, buckets::FLOOR);
        let value = item.get().ok_or(BootError::MissingFloor {
            bucket: buckets::FLOOR,
        })?;
        let floor = Floor::try_from(value).map_err(|e| BootError::InvalidFloor { value: e.0 })?;

        let mut engine = MappingEngine::new();
        engine.init(store);
        info!(
            "Relay booted on floor 0x{:x} with {} mappings",
            floor.value(),
            engine.len()
        );
        Ok(Self {
            mbox,
            floor,
            engine,
        })
    }

    /// The floor this relay serves
    pub fn floor(&self) -> Floor {
        self.floor
    }

    /// The mapping table
    pub fn engine(&self) -> &MappingEngine {
        &self.engine
    }

    /// The acceptance filters the relay needs
    pub fn filters(&self) -> [AcceptanceFilter; 4] {
        let floor = self.floor.value();
        [
            AcceptanceFilter::floor_and_class(MessageClass::Normal, floor),
            AcceptanceFilter::floor_and_class(MessageClass::Complex, floor),
            AcceptanceFilter::strict(MessageClass::Config, floor),
            AcceptanceFilter::strict(MessageClass::Mappings, floor),
        ]
    }

    /// Install the relay's acceptance filters, replacing any existing ones
    pub fn configure(&self, transport: &mut dyn CanTransport) {
        transport.clear_filters();
        for filter in self.filters() {
            transport.set_filter(filter);
        }
    }

    /// Act on everything pending in the mailbox
    ///
    /// Every queued operation is handled first, in arrival order, then mapping updates, then
    /// mapping dump requests.
    pub fn process(
        &mut self,
        transport: &mut dyn CanTransport,
        store: &mut dyn KeyValueStore,
        outputs: &mut dyn DigitalOutput,
    ) {
        let now = self.mbox.now();
        while let Some(request) = self.mbox.take_operation() {
            self.process_operation(request, now, transport, outputs);
        }
        if let Some(update) = self.mbox.take_mapping_update() {
            self.process_mapping_update(update, store);
        }
        if let Some(request) = self.mbox.take_mappings_request() {
            self.process_mappings_request(request, transport);
        }
    }

    fn process_operation(
        &mut self,
        request: ComplexRequest,
        now: Ticks,
        transport: &mut dyn CanTransport,
        outputs: &mut dyn DigitalOutput,
    ) {
        if request.operation == Operation::Get {
            let counters = transport.error_counters();
            let reply = StatusReply::new(
                self.floor.value(),
                self.engine.status_snapshot(outputs),
                counters.tx,
                counters.rx,
            );
            if let Err(e) = transport.send(reply.into()) {
                warn!("Failed to send status reply: {:?}", e);
            }
            return;
        }

        let floor = self.floor.value();
        if Floor::of(request.node_id) != self.floor {
            debug!("Ignoring operation for node {} on another floor", request.node_id);
            return;
        }
        match request.node_id.cmp(&floor) {
            Ordering::Equal => {
                for number in 1..=self.engine.used_output_count() {
                    if let Some(output) = lookup_output(number) {
                        apply(request.operation, output, outputs);
                        self.engine.touch(output, now);
                    }
                }
            }
            Ordering::Greater => {
                if let Some(output) = self.engine.resolve(request.node_id, now) {
                    apply(request.operation, output, outputs);
                }
            }
            Ordering::Less => (),
        }
    }

    fn process_mapping_update(&mut self, update: MappingUpdate, store: &mut dyn KeyValueStore) {
        if update.floor_value != self.floor.value() {
            debug!("Ignoring mapping update for floor 0x{:x}", update.floor_value);
            return;
        }
        match self
            .engine
            .update(store, update.slot, update.node_id, update.output_number)
        {
            Ok(()) => info!(
                "Mapping slot {} set to node {} output {}",
                update.slot, update.node_id, update.output_number
            ),
            Err(e) => warn!("Mapping update rejected: {:?}", e),
        }
    }

    fn process_mappings_request(
        &mut self,
        request: MappingsRequest,
        transport: &mut dyn CanTransport,
    ) {
        if request.floor_value != self.floor.value() {
            debug!("Ignoring mappings request for floor 0x{:x}", request.floor_value);
            return;
        }
        let mut writer = MappingDumpWriter::new(self.floor.value(), |msg| {
            if let Err(e) = transport.send_sync(msg) {
                warn!("Failed to send mapping dump frame: {:?}", e);
            }
        });
        for mapping in self.engine.mappings() {
            writer.push(mapping.node_id, mapping.output_number);
        }
        writer.finish();
    }
}

fn apply(operation: Operation, output: Output, outputs: &mut dyn DigitalOutput) {
    if operation == Operation::Toggle {
        outputs.toggle(output.pin);
    } else if let Some(on) = operation.apply(outputs.read(output.pin)) {
        outputs.write(output.pin, on);
    }
}
