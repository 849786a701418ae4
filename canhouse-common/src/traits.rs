//! Collaborator traits
//!
//! Nodes never touch the CAN controller or the EEPROM directly. The application wires hardware
//! drivers in through these traits.

use snafu::Snafu;

use crate::constants::BLANK_VALUE;
use crate::filter::AcceptanceFilter;
use crate::messages::CanMessage;

/// Error type for CAN send operations containing the failed message
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanSendError(pub CanMessage);

impl core::fmt::Display for CanSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to send CAN message: {:?}", self.0)
    }
}

impl core::error::Error for CanSendError {}

/// Transmit and receive error counters of the CAN controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub tx: u8,
    /// Receive error counter
    pub rx: u8,
}

/// A synchronous CAN transport
///
/// Received frames do not come through this trait; the receive interrupt hands them to a node
/// mailbox instead.
pub trait CanTransport {
    /// Install an acceptance filter in addition to the ones already installed
    fn set_filter(&mut self, filter: AcceptanceFilter);

    /// Remove all acceptance filters
    fn clear_filters(&mut self);

    /// Queue a frame for transmission
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError>;

    /// Transmit a frame and wait for the controller to finish with it
    ///
    /// Used where frame order matters, e.g. the frames of a mapping dump. The default
    /// implementation is `send`.
    fn send_sync(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        self.send(msg)
    }

    /// Read the controller error counters
    fn error_counters(&self) -> ErrorCounters;
}

/// Error returned by a [`KeyValueStore`] write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The bucket is outside the storage
    #[snafu(display("Bucket {bucket} is out of range"))]
    OutOfRange {
        /// The requested bucket
        bucket: u16,
    },
    /// The device did not report completion in time
    #[snafu(display("Timed out writing bucket {bucket}"))]
    WriteTimeout {
        /// The bucket being written
        bucket: u16,
    },
}

/// Non-volatile storage of 16-bit values in numbered buckets
///
/// A bucket which was never written reads back as [`BLANK_VALUE`].
pub trait KeyValueStore {
    /// Read a bucket
    fn load(&self, bucket: u16) -> u16;

    /// Write a bucket, returning only when the write has completed
    fn save(&mut self, bucket: u16, value: u16) -> Result<(), StoreError>;
}

/// A value read from a [`KeyValueStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItem {
    /// The bucket the value was read from
    pub bucket: u16,
    /// The raw value
    pub value: u16,
}

impl DataItem {
    /// Read `bucket` from `store`
    pub fn load(store: &(impl KeyValueStore + ?Sized), bucket: u16) -> Self {
        Self {
            bucket,
            value: store.load(bucket),
        }
    }

    /// Returns true unless the bucket is blank
    pub fn is_set(&self) -> bool {
        self.value != BLANK_VALUE
    }

    /// Validity of an identity-like value, e.g. a node ID, which can also never be zero
    pub fn is_valid_identity(&self) -> bool {
        self.is_set() && self.value != 0
    }

    /// The value if the bucket is set
    pub fn get(&self) -> Option<u16> {
        self.is_set().then_some(self.value)
    }

    /// High byte of the value
    pub fn high(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Low byte of the value
    pub fn low(&self) -> u8 {
        (self.value & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u16);
    impl KeyValueStore for Fixed {
        fn load(&self, _bucket: u16) -> u16 {
            self.0
        }
        fn save(&mut self, _bucket: u16, value: u16) -> Result<(), StoreError> {
            self.0 = value;
            Ok(())
        }
    }

    #[test]
    fn test_data_item_validity() {
        let blank = DataItem::load(&Fixed(BLANK_VALUE), 0);
        assert!(!blank.is_set());
        assert_eq!(None, blank.get());

        let zero = DataItem::load(&Fixed(0), 0);
        assert!(zero.is_set());
        assert!(!zero.is_valid_identity());

        let item = DataItem::load(&Fixed(0x0503), 4);
        assert!(item.is_valid_identity());
        assert_eq!((5, 3), (item.high(), item.low()));
        assert_eq!(4, item.bucket);
    }
}
