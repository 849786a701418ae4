//! Writing an initial configuration into node storage
//!
//! A node refuses to boot from blank storage. These helpers write what [`Relay::boot`] and
//! [`Switch::boot`] expect, e.g. from a bench programmer or from a simulation harness.
//!
//! [`Relay::boot`]: crate::Relay::boot
//! [`Switch::boot`]: crate::Switch::boot

use canhouse_common::constants::{buckets, BLANK_VALUE, MAX_MAPPING_SLOTS};
use canhouse_common::traits::{KeyValueStore, StoreError};
use canhouse_common::Floor;
use snafu::{ResultExt as _, Snafu};

use crate::mapping::{slot_bucket, Mapping};
use crate::switch::NodeConfig;

/// Error returned while provisioning a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProvisionError {
    /// More mappings than slots
    #[snafu(display("{count} mappings do not fit in {MAX_MAPPING_SLOTS} slots"))]
    TooManyMappings {
        /// Number of mappings requested
        count: usize,
    },
    /// A bucket could not be written
    #[snafu(display("Failed to write bucket {bucket}: {source}"))]
    Write {
        /// The bucket
        bucket: u16,
        /// The storage error
        source: StoreError,
    },
}

fn write(store: &mut dyn KeyValueStore, bucket: u16, value: u16) -> Result<(), ProvisionError> {
    store.save(bucket, value).context(WriteSnafu { bucket })
}

/// Write the floor and the mapping table of a relay
///
/// Mappings fill slots from 1 upwards. The slot after the last one is blanked so a table left over
/// from an earlier provisioning does not extend this one.
pub fn provision_relay(
    store: &mut dyn KeyValueStore,
    floor: Floor,
    mappings: &[Mapping],
) -> Result<(), ProvisionError> {
    if mappings.len() > MAX_MAPPING_SLOTS {
        return TooManyMappingsSnafu {
            count: mappings.len(),
        }
        .fail();
    }
    write(store, buckets::FLOOR, floor.value() as u16)?;
    for (i, mapping) in mappings.iter().enumerate() {
        write(store, slot_bucket(i as u8 + 1), mapping.pack())?;
    }
    if mappings.len() < MAX_MAPPING_SLOTS {
        write(store, slot_bucket(mappings.len() as u8 + 1), BLANK_VALUE)?;
    }
    Ok(())
}

/// Write the configuration of a switch
pub fn provision_switch(
    store: &mut dyn KeyValueStore,
    config: &NodeConfig,
) -> Result<(), ProvisionError> {
    write(store, buckets::NODE_ID, config.node_id as u16)?;
    write(store, buckets::HEARTBEAT_TIMEOUT, config.heartbeat_timeout)?;
    write(store, buckets::SUPPRESS_SWITCH, config.suppress_switch as u16)?;
    write(store, buckets::DEBUG, config.debug as u16)
}

/// Provision a node from a device config file
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub fn provision(
    store: &mut dyn KeyValueStore,
    config: &canhouse_common::device_config::DeviceConfig,
) -> Result<(), ProvisionError> {
    use canhouse_common::device_config::DeviceConfig;
    match config {
        DeviceConfig::Relay(relay) => {
            let mappings: std::vec::Vec<Mapping> = relay
                .mappings
                .iter()
                .map(|m| Mapping::new(m.node_id, m.output))
                .collect();
            provision_relay(store, relay.floor, &mappings)
        }
        DeviceConfig::Switch(switch) => provision_switch(
            store,
            &NodeConfig {
                node_id: switch.node_id,
                heartbeat_timeout: switch.heartbeat_timeout,
                suppress_switch: switch.suppress_switch,
                debug: switch.debug,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEngine;
    use crate::storage::RamStore;
    use crate::{Relay, RelayMbox, Switch, SwitchMbox};

    #[test]
    fn test_provisioned_relay_boots() {
        let mut store = RamStore::<8>::new();
        // A longer table left over from before
        for slot in 1..=5 {
            store.save(slot_bucket(slot), Mapping::new(1, 1).pack()).unwrap();
        }
        provision_relay(
            &mut store,
            Floor::First,
            &[Mapping::new(0x81, 2), Mapping::new(0x82, 4)],
        )
        .unwrap();

        let mbox = RelayMbox::new();
        let relay = Relay::boot(&mbox, &store).unwrap();
        assert_eq!(Floor::First, relay.floor());
        assert_eq!(
            &[Mapping::new(0x81, 2), Mapping::new(0x82, 4)],
            relay.engine().mappings()
        );

        let mut engine = MappingEngine::new();
        engine.init(&store);
        assert_eq!(4, engine.used_output_count());
    }

    #[test]
    fn test_provisioned_switch_boots() {
        let mut store = RamStore::<4>::new();
        let config = NodeConfig {
            node_id: 0x85,
            heartbeat_timeout: 30,
            suppress_switch: false,
            debug: true,
        };
        provision_switch(&mut store, &config).unwrap();
        let mbox = SwitchMbox::new();
        let switch = Switch::boot(&mbox, &store).unwrap();
        assert_eq!(&config, switch.config());
    }

    #[test]
    fn test_write_failure() {
        let mut store = RamStore::<2>::new();
        let config = NodeConfig {
            node_id: 1,
            heartbeat_timeout: 30,
            suppress_switch: false,
            debug: false,
        };
        assert_eq!(
            Err(ProvisionError::Write {
                bucket: 2,
                source: StoreError::OutOfRange { bucket: 2 }
            }),
            provision_switch(&mut store, &config)
        );
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_provision_from_device_config() {
        use canhouse_common::device_config::DeviceConfig;
        let config = DeviceConfig::load_from_str(
            r#"
            role = "relay"
            floor = "ground"
            mappings = [{ node_id = 1, output = 5 }]
            "#,
        )
        .unwrap();
        let mut store = RamStore::<4>::new();
        provision(&mut store, &config).unwrap();
        assert_eq!(0, store.load(buckets::FLOOR));
        assert_eq!(0x0105, store.load(slot_bucket(1)));
        assert_eq!(BLANK_VALUE, store.load(slot_bucket(2)));
    }
}
