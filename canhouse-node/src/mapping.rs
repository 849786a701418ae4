//! Node ID to output mapping
//!
//! A relay keeps a table of `(node_id, output_number)` mappings. Slot `n` of the table (1 based)
//! is persisted in bucket `n` as `node_id << 8 | output_number`. At boot, slots are read starting
//! from slot 1 until the first blank bucket, so a slot is only recognised when every slot before
//! it is set.
//!
//! The engine also tracks how many outputs are in use (the highest output number seen in a valid
//! mapping this boot) and debounces operations per output.

use canhouse_common::constants::{
    buckets, ERASE_OUTPUT, MAX_MAPPING_SLOTS, OUTPUT_COUNT, UNMAPPED_NODE_ID,
};
use canhouse_common::messages::StatusSnapshot;
use canhouse_common::traits::{DataItem, KeyValueStore, StoreError};
use defmt_or_log::{debug, warn};
use heapless::Vec;
use snafu::{ResultExt as _, Snafu};

use crate::output::{lookup_output, DigitalOutput, Output};

/// Time in quarter seconds since boot
pub type Ticks = u32;

/// Minimum number of ticks between two accepted operations on one output, exclusive
pub const DEBOUNCE_TICKS: Ticks = 1;

/// One entry of the mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mapping {
    /// Node ID of the button
    pub node_id: u8,
    /// Output switched by the button
    pub output_number: u8,
}

impl Mapping {
    /// Placeholder for slots which can never match
    pub const UNMAPPED: Mapping = Mapping {
        node_id: UNMAPPED_NODE_ID,
        output_number: OUTPUT_COUNT,
    };

    /// Create a mapping
    pub const fn new(node_id: u8, output_number: u8) -> Self {
        Self {
            node_id,
            output_number,
        }
    }

    /// Value stored in the slot bucket
    pub const fn pack(&self) -> u16 {
        ((self.node_id as u16) << 8) | self.output_number as u16
    }

    /// Returns true for the pair which erases a slot
    pub const fn is_erase(&self) -> bool {
        self.node_id == UNMAPPED_NODE_ID && self.output_number == ERASE_OUTPUT
    }

    fn has_valid_output(&self) -> bool {
        self.output_number > 0 && self.output_number <= OUTPUT_COUNT
    }
}

/// Bucket holding mapping `slot`
pub const fn slot_bucket(slot: u8) -> u16 {
    buckets::FIRST_MAPPING + slot as u16 - 1
}

/// Error returned when a mapping update is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MappingError {
    /// Slots are numbered from 1
    #[snafu(display("Mapping slot {slot} is out of range"))]
    InvalidSlot {
        /// The rejected slot
        slot: u8,
    },
    /// The output does not exist and the pair is not the erase pair
    #[snafu(display("Output {output_number} does not exist"))]
    InvalidOutput {
        /// The rejected output number
        output_number: u8,
    },
    /// Writing the slot failed
    ///
    /// The in-memory table is unchanged. The bucket itself may hold the new high byte with the
    /// old low byte, see [`crate::storage::EepromStore`].
    #[snafu(display("Failed to persist mapping slot {slot}: {source}"))]
    Persist {
        /// The slot being written
        slot: u8,
        /// The storage error
        source: StoreError,
    },
}

/// The in-memory mapping table of a relay
#[derive(Debug)]
pub struct MappingEngine {
    mappings: Vec<Mapping, MAX_MAPPING_SLOTS>,
    used_outputs: u8,
    last_access: [Ticks; OUTPUT_COUNT as usize],
}

impl Default for MappingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingEngine {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            mappings: Vec::new(),
            used_outputs: 0,
            last_access: [0; OUTPUT_COUNT as usize],
        }
    }

    /// Reload the table from storage
    pub fn init(&mut self, store: &dyn KeyValueStore) {
        self.mappings.clear();
        self.used_outputs = 0;

        for slot in 1..=MAX_MAPPING_SLOTS as u8 {
            let item = DataItem::load(store, slot_bucket(slot));
            if !item.is_set() {
                break;
            }
            let mapping = Mapping::new(item.high(), item.low());
            let entry = if mapping.has_valid_output() {
                self.note_used(mapping.output_number);
                mapping
            } else {
                warn!(
                    "Slot {} holds invalid output {}, disabling it",
                    slot, mapping.output_number
                );
                Mapping::UNMAPPED
            };
            // Capacity is MAX_MAPPING_SLOTS, the loop never exceeds it
            let _ = self.mappings.push(entry);
        }
        debug!(
            "Loaded {} mappings, {} outputs used",
            self.mappings.len(),
            self.used_outputs
        );
    }

    fn note_used(&mut self, output_number: u8) {
        self.used_outputs = self.used_outputs.max(output_number);
        self.last_access[output_number as usize - 1] = 0;
    }

    /// Find the output mapped to `node_id`, applying the debounce window
    ///
    /// On success the access time of the output is updated to `now`.
    pub fn resolve(&mut self, node_id: u8, now: Ticks) -> Option<Output> {
        if node_id == UNMAPPED_NODE_ID {
            return None;
        }
        let mapping = self.mappings.iter().find(|m| m.node_id == node_id)?;
        let output = lookup_output(mapping.output_number)?;
        let last = self.last_access[output.number as usize - 1];
        if now > last.saturating_add(DEBOUNCE_TICKS) {
            self.touch(output, now);
            Some(output)
        } else {
            debug!("Debounced operation on output {}", output.number);
            None
        }
    }

    /// Record an operation on `output` at `now`
    pub fn touch(&mut self, output: Output, now: Ticks) {
        if let Some(last) = self.last_access.get_mut(output.number as usize - 1) {
            *last = now;
        }
    }

    /// Change one slot, persisting it first
    ///
    /// Updating a slot past the end of the table grows it; any slots in between hold
    /// [`Mapping::UNMAPPED`] until they are updated. Storage is not touched for those, so a reboot
    /// truncates the table at the first gap.
    pub fn update(
        &mut self,
        store: &mut dyn KeyValueStore,
        slot: u8,
        node_id: u8,
        output_number: u8,
    ) -> Result<(), MappingError> {
        if slot == 0 {
            return InvalidSlotSnafu { slot }.fail();
        }
        let mapping = Mapping::new(node_id, output_number);
        if !mapping.has_valid_output() && !mapping.is_erase() {
            return InvalidOutputSnafu { output_number }.fail();
        }

        store
            .save(slot_bucket(slot), mapping.pack())
            .context(PersistSnafu { slot })?;

        let entry = if mapping.has_valid_output() {
            self.note_used(output_number);
            mapping
        } else {
            Mapping::UNMAPPED
        };
        let index = slot as usize - 1;
        while self.mappings.len() <= index {
            // Slot is at most MAX_MAPPING_SLOTS so this never overflows the table
            let _ = self.mappings.push(Mapping::UNMAPPED);
        }
        self.mappings[index] = entry;
        Ok(())
    }

    /// Number of slots in the table
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true when no slot is loaded
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// The table, slot 1 first
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Number of used outputs
    pub fn used_output_count(&self) -> u8 {
        self.used_outputs
    }

    /// Outputs 1 to the used output count
    pub fn used_outputs(&self) -> impl Iterator<Item = Output> {
        (1..=self.used_outputs).filter_map(lookup_output)
    }

    /// Count of used outputs plus their current state
    pub fn status_snapshot(&self, outputs: &dyn DigitalOutput) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            used_outputs: self.used_outputs,
            bitmap: [0; 4],
        };
        for (i, output) in self.used_outputs().enumerate() {
            if outputs.read(output.pin) {
                snapshot.bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PortBank;
    use crate::storage::RamStore;

    type Store = RamStore<64>;

    fn engine_with(store: &Store) -> MappingEngine {
        let mut engine = MappingEngine::new();
        engine.init(store);
        engine
    }

    #[test]
    fn test_debounced_resolve() {
        let mut store = Store::new();
        store.save(slot_bucket(1), Mapping::new(5, 3).pack()).unwrap();
        let mut engine = engine_with(&store);

        assert_eq!(Some(3), engine.resolve(5, 100).map(|o| o.number));
        assert_eq!(None, engine.resolve(5, 100));
        assert_eq!(None, engine.resolve(5, 101));
        assert_eq!(Some(3), engine.resolve(5, 102).map(|o| o.number));
    }

    #[test]
    fn test_resolve_unknown_and_unmapped() {
        let mut store = Store::new();
        store.save(slot_bucket(1), Mapping::new(5, 3).pack()).unwrap();
        let mut engine = engine_with(&store);
        assert_eq!(None, engine.resolve(6, 100));
        assert_eq!(None, engine.resolve(UNMAPPED_NODE_ID, 100));
    }

    #[test]
    fn test_first_match_wins() {
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        engine.update(&mut store, 1, 7, 2).unwrap();
        engine.update(&mut store, 2, 7, 9).unwrap();
        assert_eq!(Some(2), engine.resolve(7, 10).map(|o| o.number));
    }

    #[test]
    fn test_init_stops_at_first_gap() {
        let mut store = Store::new();
        store.save(slot_bucket(1), Mapping::new(1, 1).pack()).unwrap();
        store.save(slot_bucket(2), Mapping::new(2, 2).pack()).unwrap();
        store.save(slot_bucket(4), Mapping::new(4, 4).pack()).unwrap();
        let engine = engine_with(&store);
        assert_eq!(2, engine.len());
        assert_eq!(2, engine.used_output_count());
    }

    #[test]
    fn test_init_clamps_invalid_output() {
        let mut store = Store::new();
        store.save(slot_bucket(1), Mapping::new(9, 31).pack()).unwrap();
        store.save(slot_bucket(2), Mapping::new(10, 4).pack()).unwrap();
        let mut engine = engine_with(&store);
        assert_eq!(&[Mapping::UNMAPPED, Mapping::new(10, 4)], engine.mappings());
        assert_eq!(4, engine.used_output_count());
        assert_eq!(None, engine.resolve(9, 100));
    }

    #[test]
    fn test_update_rejects() {
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        assert_eq!(
            Err(MappingError::InvalidSlot { slot: 0 }),
            engine.update(&mut store, 0, 5, 3)
        );
        assert_eq!(
            Err(MappingError::InvalidOutput { output_number: 0 }),
            engine.update(&mut store, 1, 5, 0)
        );
        assert_eq!(
            Err(MappingError::InvalidOutput { output_number: 31 }),
            engine.update(&mut store, 1, 5, 31)
        );
        // Only the full erase pair is accepted
        assert_eq!(
            Err(MappingError::InvalidOutput { output_number: 0xFF }),
            engine.update(&mut store, 1, 5, 0xFF)
        );
        assert!(engine.is_empty());
        assert_eq!(0xFFFF, store.load(slot_bucket(1)));
    }

    #[test]
    fn test_update_store_failure_leaves_table() {
        let mut store = RamStore::<2>::new();
        let mut engine = MappingEngine::new();
        let result = engine.update(&mut store, 5, 5, 3);
        assert!(matches!(
            result,
            Err(MappingError::Persist {
                slot: 5,
                source: StoreError::OutOfRange { bucket: 5 }
            })
        ));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_erase() {
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        engine.update(&mut store, 1, 5, 3).unwrap();
        engine.update(&mut store, 2, 6, 4).unwrap();
        assert!(engine.resolve(5, 10).is_some());

        engine.update(&mut store, 1, 0xFF, 0xFF).unwrap();
        assert_eq!(0xFFFF, store.load(slot_bucket(1)));
        assert_eq!(None, engine.resolve(5, 20));
        assert_eq!(Mapping::UNMAPPED, engine.mappings()[0]);
        // Used outputs never shrink within a boot
        assert_eq!(4, engine.used_output_count());

        // Erasing past the end persists as well
        engine.update(&mut store, 40, 0xFF, 0xFF).unwrap();
        assert_eq!(0xFFFF, store.load(slot_bucket(40)));
    }

    #[test]
    fn test_disconnected_update_is_lost_on_reboot() {
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        engine.update(&mut store, 1, 5, 1).unwrap();

        engine.update(&mut store, 3, 9, 2).unwrap();
        assert_eq!(0x0902, store.load(slot_bucket(3)));
        assert_eq!(3, engine.len());
        assert_eq!(Mapping::UNMAPPED, engine.mappings()[1]);
        assert_eq!(Some(2), engine.resolve(9, 10).map(|o| o.number));

        let rebooted = engine_with(&store);
        assert_eq!(1, rebooted.len());
    }

    #[test]
    fn test_reboot_keeps_longest_prefix() {
        let updates: &[(u8, u8, u8)] = &[
            (1, 1, 1),
            (2, 2, 2),
            (5, 5, 5),
            (3, 3, 3),
            (2, 0xFF, 0xFF),
            (4, 4, 4),
            (7, 7, 7),
        ];
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        for (i, (slot, node, output)) in updates.iter().enumerate() {
            engine.update(&mut store, *slot, *node, *output).unwrap();

            let expected = (1..=MAX_MAPPING_SLOTS as u8)
                .take_while(|s| store.load(slot_bucket(*s)) != 0xFFFF)
                .count();
            let rebooted = engine_with(&store);
            assert_eq!(expected, rebooted.len(), "after update {i}");
        }
        // Slot 2 was erased, so only slot 1 survives
        assert_eq!(1, engine_with(&store).len());
    }

    #[test]
    fn test_status_snapshot() {
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        engine.update(&mut store, 1, 1, 1).unwrap();
        engine.update(&mut store, 2, 2, 2).unwrap();
        engine.update(&mut store, 3, 3, 3).unwrap();

        let mut outputs = PortBank::new();
        for n in [1, 2] {
            outputs.write(lookup_output(n).unwrap().pin, true);
        }
        let snapshot = engine.status_snapshot(&outputs);
        assert_eq!([3, 0b1100_0000, 0, 0, 0], snapshot.to_bytes());
    }

    #[test]
    fn test_status_snapshot_size() {
        let mut outputs = PortBank::new();
        for o in crate::output::OUTPUTS.iter() {
            outputs.write(o.pin, true);
        }
        let mut store = Store::new();
        let mut engine = MappingEngine::new();
        let empty = engine.status_snapshot(&outputs);
        assert_eq!([0, 0, 0, 0, 0], empty.to_bytes());

        engine.update(&mut store, 1, 1, OUTPUT_COUNT).unwrap();
        let full = engine.status_snapshot(&outputs);
        assert_eq!(StatusSnapshot::SIZE, full.to_bytes().len());
        assert_eq!([30, 0xFF, 0xFF, 0xFF, 0b1111_1100], full.to_bytes());
    }
}
