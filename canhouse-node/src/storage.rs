//! Persistent storage adapters
//!
//! Both node roles keep their configuration in 16-bit buckets of the MCU data EEPROM. Bucket `n`
//! occupies bytes `2n` (high byte) and `2n + 1` (low byte).

use canhouse_common::constants::BLANK_VALUE;
use canhouse_common::traits::{KeyValueStore, StoreError};

/// Default number of polls of the write-in-progress flag before a write is abandoned
pub const DEFAULT_WRITE_POLLS: u32 = 100_000;

/// A byte addressed EEPROM peripheral
pub trait EepromDevice {
    /// Size of the device in bytes
    fn capacity(&self) -> u16;

    /// Read one byte
    fn read_byte(&self, addr: u16) -> u8;

    /// Start writing one byte. Completion is reported by [`EepromDevice::write_in_progress`].
    fn start_write(&mut self, addr: u16, value: u8);

    /// Returns true while the last started write has not completed
    fn write_in_progress(&self) -> bool;
}

/// A [`KeyValueStore`] on top of an [`EepromDevice`]
///
/// Every access runs inside a critical section so a receive interrupt cannot observe a half
/// written bucket.
///
/// A bucket is written high byte first. When the low byte write times out the bucket is left
/// torn: new high byte, old low byte. The caller gets [`StoreError::WriteTimeout`] and should
/// treat the bucket as unknown until it is written again.
#[derive(Debug)]
pub struct EepromStore<D: EepromDevice> {
    device: D,
    max_polls: u32,
}

impl<D: EepromDevice> EepromStore<D> {
    /// Create a store using the default write timeout
    pub fn new(device: D) -> Self {
        Self::with_write_polls(device, DEFAULT_WRITE_POLLS)
    }

    /// Create a store giving up on a write after `max_polls` polls of the busy flag
    pub fn with_write_polls(device: D, max_polls: u32) -> Self {
        Self { device, max_polls }
    }

    /// Access the underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    fn bucket_addr(&self, bucket: u16) -> Option<u16> {
        let addr = bucket.checked_mul(2)?;
        (addr.checked_add(1)? < self.device.capacity()).then_some(addr)
    }

    fn write_byte(&mut self, bucket: u16, addr: u16, value: u8) -> Result<(), StoreError> {
        self.device.start_write(addr, value);
        for _ in 0..self.max_polls {
            if !self.device.write_in_progress() {
                return Ok(());
            }
        }
        Err(StoreError::WriteTimeout { bucket })
    }
}

impl<D: EepromDevice> KeyValueStore for EepromStore<D> {
    fn load(&self, bucket: u16) -> u16 {
        let Some(addr) = self.bucket_addr(bucket) else {
            return BLANK_VALUE;
        };
        critical_section::with(|_| {
            u16::from_be_bytes([self.device.read_byte(addr), self.device.read_byte(addr + 1)])
        })
    }

    fn save(&mut self, bucket: u16, value: u16) -> Result<(), StoreError> {
        let addr = self
            .bucket_addr(bucket)
            .ok_or(StoreError::OutOfRange { bucket })?;
        let [high, low] = value.to_be_bytes();
        critical_section::with(|_| {
            self.write_byte(bucket, addr, high)?;
            self.write_byte(bucket, addr + 1, low)
        })
    }
}

/// A RAM backed store with `N` buckets, for simulation and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamStore<const N: usize> {
    buckets: [u16; N],
}

impl<const N: usize> Default for RamStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamStore<N> {
    /// Create a store with every bucket blank
    pub const fn new() -> Self {
        Self {
            buckets: [BLANK_VALUE; N],
        }
    }

    /// Number of buckets
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> KeyValueStore for RamStore<N> {
    fn load(&self, bucket: u16) -> u16 {
        self.buckets
            .get(bucket as usize)
            .copied()
            .unwrap_or(BLANK_VALUE)
    }

    fn save(&mut self, bucket: u16, value: u16) -> Result<(), StoreError> {
        let slot = self
            .buckets
            .get_mut(bucket as usize)
            .ok_or(StoreError::OutOfRange { bucket })?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEeprom {
        bytes: [u8; 16],
        busy_polls: core::cell::Cell<u32>,
        stuck: bool,
        writes: u32,
        stuck_after_writes: Option<u32>,
    }

    impl FakeEeprom {
        fn new() -> Self {
            Self {
                bytes: [0xFF; 16],
                busy_polls: core::cell::Cell::new(0),
                stuck: false,
                writes: 0,
                stuck_after_writes: None,
            }
        }
    }

    impl FakeEeprom {
        fn hung(&self) -> bool {
            self.stuck_after_writes.is_some_and(|n| self.writes > n)
        }
    }

    impl EepromDevice for FakeEeprom {
        fn capacity(&self) -> u16 {
            self.bytes.len() as u16
        }

        fn read_byte(&self, addr: u16) -> u8 {
            self.bytes[addr as usize]
        }

        fn start_write(&mut self, addr: u16, value: u8) {
            self.writes += 1;
            if !self.hung() {
                self.bytes[addr as usize] = value;
            }
            self.busy_polls.set(3);
        }

        fn write_in_progress(&self) -> bool {
            if self.stuck || self.hung() {
                return true;
            }
            let remaining = self.busy_polls.get();
            self.busy_polls.set(remaining.saturating_sub(1));
            remaining > 0
        }
    }

    #[test]
    fn test_eeprom_layout() {
        let mut store = EepromStore::new(FakeEeprom::new());
        assert_eq!(BLANK_VALUE, store.load(2));
        store.save(2, 0x0503).unwrap();
        assert_eq!(0x0503, store.load(2));
        assert_eq!(&[0x05, 0x03], &store.device().bytes[4..6]);
    }

    #[test]
    fn test_eeprom_out_of_range() {
        let mut store = EepromStore::new(FakeEeprom::new());
        assert_eq!(BLANK_VALUE, store.load(8));
        assert_eq!(
            Err(StoreError::OutOfRange { bucket: 8 }),
            store.save(8, 1)
        );
    }

    #[test]
    fn test_eeprom_write_timeout() {
        let mut device = FakeEeprom::new();
        device.stuck = true;
        let mut store = EepromStore::with_write_polls(device, 10);
        assert_eq!(
            Err(StoreError::WriteTimeout { bucket: 1 }),
            store.save(1, 7)
        );
    }

    #[test]
    fn test_eeprom_timeout_on_low_byte_tears_bucket() {
        let mut store = EepromStore::with_write_polls(FakeEeprom::new(), 10);
        store.save(1, 0x0503).unwrap();
        let mut device = FakeEeprom::new();
        device.bytes = store.device().bytes;
        device.stuck_after_writes = Some(1);
        let mut store = EepromStore::with_write_polls(device, 10);

        assert_eq!(
            Err(StoreError::WriteTimeout { bucket: 1 }),
            store.save(1, 0x0907)
        );
        assert_eq!(0x0903, store.load(1));
    }

    #[test]
    fn test_ram_store() {
        let mut store = RamStore::<4>::new();
        assert_eq!(BLANK_VALUE, store.load(0));
        store.save(3, 42).unwrap();
        assert_eq!(42, store.load(3));
        assert_eq!(BLANK_VALUE, store.load(4));
        assert!(store.save(4, 1).is_err());
    }
}
