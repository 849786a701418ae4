//! Node logic for a CAN bus controlled house lighting network
//!
//! Two kinds of node share the bus:
//!
//! * A [`Relay`] drives up to 30 outputs. It toggles the output mapped to a button when it hears
//!   a NORMAL frame, executes COMPLEX operations, keeps its mapping table in EEPROM, and dumps
//!   the table on request.
//! * A [`Switch`] reports button presses, sends periodic heartbeats, and sleeps in between.
//!
//! The crate is `no_std` and does not allocate. Hardware is reached through the traits in
//! [`common::traits`], [`output::DigitalOutput`], [`storage::EepromDevice`] and
//! [`switch::SwitchBoard`], so the same code runs on a microcontroller and in the simulated bus
//! used by the integration tests.
//!
//! # Wiring up a node
//!
//! Each role has a mailbox which is shared with the interrupt handlers, and a node object owned
//! by the main loop:
//!
//! ```ignore
//! static MBOX: RelayMbox = RelayMbox::new();
//!
//! // CAN receive interrupt
//! fn on_rx(msg: CanMessage) {
//!     let _ = MBOX.store_message(msg);
//! }
//!
//! // Quarter second timer
//! fn on_timer() {
//!     MBOX.tick();
//! }
//!
//! fn main() -> ! {
//!     let mut relay = Relay::boot(&MBOX, &store).unwrap();
//!     relay.configure(&mut can);
//!     loop {
//!         relay.process(&mut can, &mut store, &mut outputs);
//!     }
//! }
//! ```
//!
//! A node does not boot from blank storage; see [`provision`] for writing an initial
//! configuration.
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use snafu::Snafu;

pub mod mapping;
pub mod output;
pub mod provision;
pub mod relay;
pub mod storage;
pub mod switch;

pub use critical_section;
pub use canhouse_common as common;

pub use relay::{Relay, RelayMbox};
pub use switch::{Switch, SwitchMbox};

/// Error returned when a node cannot boot from its stored configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// The relay floor bucket is blank
    #[snafu(display("Floor bucket {bucket} is not set"))]
    MissingFloor {
        /// The floor bucket
        bucket: u16,
    },
    /// The relay floor bucket holds something other than a floor value
    #[snafu(display("Invalid floor value 0x{value:x}"))]
    InvalidFloor {
        /// The stored value
        value: u16,
    },
    /// The switch node ID bucket is blank or zero
    #[snafu(display("Node ID bucket {bucket} is not set"))]
    MissingNodeId {
        /// The node ID bucket
        bucket: u16,
    },
    /// The switch node ID does not fit a byte
    #[snafu(display("Invalid node ID 0x{value:x}"))]
    InvalidNodeId {
        /// The stored value
        value: u16,
    },
}
