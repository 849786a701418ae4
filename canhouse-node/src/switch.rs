//! The wall switch node
//!
//! A switch reports button presses as NORMAL frames, sends a HEARTBEAT every configured number
//! of seconds, and accepts CONFIG frames addressed to its node ID which change its node ID,
//! heartbeat timeout, the suppress flag or debug mode. Outside debug mode the node sleeps between
//! passes of the main loop with the CAN transceiver in standby.
//!
//! Interrupt handlers talk to the node through a [`SwitchMbox`]:
//!
//! - the input interrupt calls [`SwitchMbox::input_edge`] on every falling edge
//! - a quarter second timer calls [`SwitchMbox::tick`]
//! - the CAN receive interrupt calls [`SwitchMbox::store_message`]
//! - the CAN wake, transmit complete and error interrupts call [`SwitchMbox::can_wake`],
//!   [`SwitchMbox::tx_complete`] and [`SwitchMbox::bus_error`]

use canhouse_common::constants::{buckets, FIRMWARE_VERSION};
use canhouse_common::filter::AcceptanceFilter;
use canhouse_common::messages::{
    CanMessage, ConfigAttribute, Heartbeat, HouseMessage, MessageClass, SwitchConfig, SwitchEvent,
};
use canhouse_common::traits::{CanTransport, DataItem, KeyValueStore};
use canhouse_common::AtomicCell;
use defmt_or_log::{debug, info, warn};

use crate::mapping::Ticks;
use crate::BootError;

/// Number of button inputs a switch board can have
pub const MAX_INPUTS: u8 = 8;

/// Time the transceiver needs to leave or enter standby
pub const TRANSCEIVER_SETTLE_US: u32 = 50;

/// Time the bus needs to settle after a CAN wake up
pub const WAKE_SETTLE_US: u32 = 5_000;

/// How long the status LED reflects the outcome of a send, in ticks
pub const STATUS_WINDOW_TICKS: Ticks = 8;

/// Board functions the switch drives directly
pub trait SwitchBoard {
    /// Drive the debug status LED
    fn set_status_led(&mut self, on: bool);

    /// Put the CAN transceiver in or out of standby
    fn set_transceiver_standby(&mut self, standby: bool);

    /// Put the CAN controller to sleep with wake-on-bus enabled, or back into normal mode
    fn set_can_sleep(&mut self, sleep: bool);

    /// Busy wait
    fn delay_us(&mut self, us: u32);

    /// Stop the CPU until the next interrupt
    fn sleep(&mut self);
}

/// Outcome of the last frame sent, as shown by the status LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// Nothing sent recently
    #[default]
    NothingSent,
    /// Handed to the controller
    Sending,
    /// Transmitted
    Ok,
    /// The controller reported an error
    Error,
}

/// Runtime configuration of a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Node ID of the first button
    pub node_id: u8,
    /// Seconds between heartbeats, 0 disables them
    pub heartbeat_timeout: u16,
    /// Do not send NORMAL frames
    pub suppress_switch: bool,
    /// Keep awake and drive the status LED
    pub debug: bool,
}

impl NodeConfig {
    /// Read the configuration from storage
    ///
    /// The node ID is mandatory. Every other value defaults to 0 when unset.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, BootError> {
        let node = DataItem::load(store, buckets::NODE_ID);
        if !node.is_valid_identity() {
            return Err(BootError::MissingNodeId {
                bucket: buckets::NODE_ID,
            });
        }
        let node_id = u8::try_from(node.value)
            .map_err(|_| BootError::InvalidNodeId { value: node.value })?;

        let heartbeat = DataItem::load(store, buckets::HEARTBEAT_TIMEOUT);
        let flag = |bucket| DataItem::load(store, bucket).get().is_some_and(|v| v != 0);
        Ok(Self {
            node_id,
            heartbeat_timeout: if heartbeat.is_valid_identity() {
                heartbeat.value
            } else {
                0
            },
            suppress_switch: flag(buckets::SUPPRESS_SWITCH),
            debug: flag(buckets::DEBUG),
        })
    }
}

/// Bucket an attribute is persisted in
pub const fn attribute_bucket(attribute: ConfigAttribute) -> u16 {
    match attribute {
        ConfigAttribute::NodeId => buckets::NODE_ID,
        ConfigAttribute::HeartbeatTimeout => buckets::HEARTBEAT_TIMEOUT,
        ConfigAttribute::SuppressSwitch => buckets::SUPPRESS_SWITCH,
        ConfigAttribute::Debug => buckets::DEBUG,
    }
}

/// Data shared between the interrupt handlers and the [`Switch`]
#[allow(missing_debug_implementations)]
pub struct SwitchMbox {
    pending_pins: AtomicCell<u8>,
    edge_count: AtomicCell<u32>,
    ticks: AtomicCell<Ticks>,
    secs_since_heartbeat: AtomicCell<u32>,
    heartbeat_timeout: AtomicCell<u16>,
    heartbeat_due: AtomicCell<bool>,
    config: AtomicCell<Option<SwitchConfig>>,
    can_wake: AtomicCell<bool>,
    asleep: AtomicCell<bool>,
    send_status: AtomicCell<SendStatus>,
    notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl Default for SwitchMbox {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchMbox {
    /// Create a new SwitchMbox
    pub const fn new() -> Self {
        Self {
            pending_pins: AtomicCell::new(0),
            edge_count: AtomicCell::new(0),
            ticks: AtomicCell::new(0),
            secs_since_heartbeat: AtomicCell::new(0),
            heartbeat_timeout: AtomicCell::new(0),
            heartbeat_due: AtomicCell::new(false),
            config: AtomicCell::new(None),
            can_wake: AtomicCell::new(false),
            asleep: AtomicCell::new(false),
            send_status: AtomicCell::new(SendStatus::NothingSent),
            notify_cb: AtomicCell::new(None),
        }
    }

    /// Set a callback for notification when an event requires processing.
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

    /// Latch a falling edge on input `pin`
    pub fn input_edge(&self, pin: u8) {
        if pin >= MAX_INPUTS {
            return;
        }
        let _ = self.pending_pins.fetch_update(|pins| Some(pins | (1 << pin)));
        let _ = self.edge_count.fetch_update(|n| Some(n.wrapping_add(1)));
        self.notify();
    }

    /// Advance the clock by one quarter second, raising a heartbeat when it is due
    pub fn tick(&self) {
        let ticks = self.ticks.load().wrapping_add(1);
        self.ticks.store(ticks);
        if ticks % 4 != 0 {
            return;
        }
        let secs = self.secs_since_heartbeat.load().wrapping_add(1);
        let timeout = self.heartbeat_timeout.load();
        if timeout != 0 && secs >= timeout as u32 {
            self.secs_since_heartbeat.store(0);
            self.heartbeat_due.store(true);
            self.notify();
        } else {
            self.secs_since_heartbeat.store(secs);
        }
    }

    /// Quarter seconds since boot
    pub fn now(&self) -> Ticks {
        self.ticks.load()
    }

    /// Total number of input edges seen since boot
    pub fn edge_count(&self) -> u32 {
        self.edge_count.load()
    }

    /// Record a CAN wake up interrupt
    ///
    /// Ignored unless the node is asleep; the controller can raise it twice on start up.
    pub fn can_wake(&self) {
        if self.asleep.load() {
            self.can_wake.store(true);
            self.notify();
        }
    }

    /// Record a completed transmission
    pub fn tx_complete(&self) {
        self.send_status.store(SendStatus::Ok);
    }

    /// Record a CAN error
    pub fn bus_error(&self) {
        self.send_status.store(SendStatus::Error);
    }

    /// Outcome of the last frame sent
    pub fn send_status(&self) -> SendStatus {
        self.send_status.load()
    }

    /// Returns true while the node is asleep
    pub fn is_asleep(&self) -> bool {
        self.asleep.load()
    }

    /// Store a received CAN message
    ///
    /// Only switch CONFIG frames are consumed; anything else is handed back in the `Err`.
    pub fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        match HouseMessage::try_from(msg) {
            Ok(HouseMessage::SwitchConfig(config)) => {
                self.config.store(Some(config));
                self.notify();
                Ok(())
            }
            Ok(_) => Err(msg),
            Err(e) => {
                warn!("Dropping malformed frame 0x{:x}: {:?}", msg.id(), e);
                Err(msg)
            }
        }
    }

    fn seed_heartbeat(&self, secs: u32, timeout: u16) {
        self.secs_since_heartbeat.store(secs);
        self.heartbeat_timeout.store(timeout);
    }
}

/// A wall switch
#[allow(missing_debug_implementations)]
pub struct Switch<'a> {
    mbox: &'a SwitchMbox,
    config: NodeConfig,
    pressed_since_heartbeat: bool,
    sent_at: Ticks,
}

impl<'a> Switch<'a> {
    /// Load the configuration from storage
    ///
    /// The seconds-since-heartbeat counter starts at the node ID so switches powered up together
    /// spread their heartbeats.
    pub fn boot(mbox: &'a SwitchMbox, store: &dyn KeyValueStore) -> Result<Self, BootError> {
        let config = NodeConfig::load(store)?;
        mbox.seed_heartbeat(config.node_id as u32, config.heartbeat_timeout);
        info!(
            "Switch {} booted, heartbeat {}s, suppress {}, debug {}",
            config.node_id, config.heartbeat_timeout, config.suppress_switch, config.debug
        );
        Ok(Self {
            mbox,
            config,
            pressed_since_heartbeat: false,
            sent_at: 0,
        })
    }

    /// The current configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The acceptance filter the switch needs
    pub fn filter(&self) -> AcceptanceFilter {
        AcceptanceFilter::strict(MessageClass::Config, self.config.node_id)
    }

    /// Install the switch's acceptance filter, replacing any existing ones
    pub fn configure(&self, transport: &mut dyn CanTransport) {
        transport.clear_filters();
        transport.set_filter(self.filter());
    }

    /// One pass of the main loop
    ///
    /// Sends pending button events, then a pending heartbeat, then applies a pending CONFIG frame
    /// and handles a CAN wake up. Outside debug mode the pass ends by sleeping until the next
    /// interrupt.
    pub fn process(
        &mut self,
        transport: &mut dyn CanTransport,
        store: &mut dyn KeyValueStore,
        board: &mut dyn SwitchBoard,
    ) {
        let now = self.mbox.now();

        let pins = self.mbox.pending_pins.take();
        if pins != 0 {
            self.pressed_since_heartbeat = true;
            if self.config.suppress_switch {
                debug!("Suppressed button event 0b{:b}", pins);
            } else {
                for pin in 0..MAX_INPUTS {
                    if pins & (1 << pin) != 0 {
                        let event = SwitchEvent {
                            node_id: self.config.node_id.wrapping_add(pin),
                            pressed: true,
                        };
                        self.send(event.into(), now, transport, board);
                    }
                }
            }
        }

        if self.mbox.heartbeat_due.take() {
            let counters = transport.error_counters();
            let heartbeat = Heartbeat {
                node_id: self.config.node_id,
                pressed: core::mem::take(&mut self.pressed_since_heartbeat),
                tx_errors: counters.tx,
                rx_errors: counters.rx,
                firmware_version: FIRMWARE_VERSION,
                uptime_secs: (now / 4) as u16,
            };
            self.send(heartbeat.into(), now, transport, board);
        }

        if let Some(config) = self.mbox.config.take() {
            self.apply_config(config, store, transport, board);
        }

        if self.mbox.can_wake.take() {
            self.wake(board);
            board.delay_us(WAKE_SETTLE_US);
        }

        if self.config.debug {
            self.update_status_led(now, board);
        } else {
            self.sleep(board);
            self.wake(board);
        }
    }

    fn send(
        &mut self,
        msg: CanMessage,
        now: Ticks,
        transport: &mut dyn CanTransport,
        board: &mut dyn SwitchBoard,
    ) {
        self.sent_at = now;
        self.mbox.send_status.store(SendStatus::Sending);
        if self.config.debug {
            board.set_status_led(true);
        }
        match transport.send_sync(msg) {
            Ok(()) => self.mbox.tx_complete(),
            Err(e) => {
                warn!("Failed to send frame: {:?}", e);
                self.mbox.bus_error();
            }
        }
    }

    fn apply_config(
        &mut self,
        config: SwitchConfig,
        store: &mut dyn KeyValueStore,
        transport: &mut dyn CanTransport,
        board: &mut dyn SwitchBoard,
    ) {
        if config.node_id != self.config.node_id {
            debug!("Ignoring config for node {}", config.node_id);
            return;
        }
        if !config.is_valid() {
            warn!(
                "Ignoring invalid value {} for attribute {:?}",
                config.value, config.attribute
            );
            return;
        }
        if let Err(e) = store.save(attribute_bucket(config.attribute), config.value) {
            warn!("Failed to persist config: {:?}", e);
            return;
        }

        match config.attribute {
            ConfigAttribute::NodeId => {
                self.config.node_id = config.value as u8;
                self.configure(transport);
            }
            ConfigAttribute::HeartbeatTimeout => {
                self.config.heartbeat_timeout = config.value;
                self.mbox.heartbeat_timeout.store(config.value);
            }
            ConfigAttribute::SuppressSwitch => self.config.suppress_switch = config.value != 0,
            ConfigAttribute::Debug => {
                self.config.debug = config.value != 0;
                if !self.config.debug {
                    board.set_status_led(false);
                }
            }
        }
        info!("Applied {:?} = {}", config.attribute, config.value);
    }

    fn update_status_led(&mut self, now: Ticks, board: &mut dyn SwitchBoard) {
        let status = self.mbox.send_status();
        if status == SendStatus::NothingSent {
            return;
        }
        let elapsed = now.wrapping_sub(self.sent_at);
        match status_led(status, elapsed) {
            StatusLed::Expired => {
                board.set_status_led(false);
                self.mbox.send_status.store(SendStatus::NothingSent);
            }
            StatusLed::Set(on) => board.set_status_led(on),
            StatusLed::Keep => (),
        }
    }

    fn sleep(&mut self, board: &mut dyn SwitchBoard) {
        if self.config.debug || self.mbox.asleep.load() {
            return;
        }
        self.mbox.asleep.store(true);
        board.set_can_sleep(true);
        board.set_transceiver_standby(true);
        board.delay_us(TRANSCEIVER_SETTLE_US);
        board.sleep();
    }

    fn wake(&mut self, board: &mut dyn SwitchBoard) {
        if !self.mbox.asleep.load() {
            return;
        }
        self.mbox.asleep.store(false);
        board.set_transceiver_standby(false);
        board.delay_us(TRANSCEIVER_SETTLE_US);
        board.set_can_sleep(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusLed {
    Set(bool),
    Keep,
    Expired,
}

/// LED state `elapsed` ticks after a send with outcome `status`
fn status_led(status: SendStatus, elapsed: Ticks) -> StatusLed {
    if elapsed > STATUS_WINDOW_TICKS {
        return StatusLed::Expired;
    }
    match status {
        SendStatus::Sending if elapsed > 1 => StatusLed::Set(false),
        SendStatus::Ok if elapsed > 0 => StatusLed::Set(true),
        SendStatus::Error => StatusLed::Set(elapsed % 2 == 0),
        _ => StatusLed::Keep,
    }
}
