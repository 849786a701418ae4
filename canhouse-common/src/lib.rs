//! Common functionality shared by the canhouse node roles
//!
//! Holds the CAN wire protocol, the acceptance filter rules, and the traits through which nodes
//! reach their transport and persistent storage.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod constants;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod device_config;
pub mod filter;
pub mod floor;
pub mod mapping_dump;
pub mod messages;
pub mod traits;

pub use filter::{AcceptanceFilter, FilterScope};
pub use floor::Floor;
pub use messages::{CanHeader, CanMessage, HouseMessage, MessageClass, MessageError, Operation};
