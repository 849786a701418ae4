//! Device config file
//!
//! A DeviceConfig is created from a TOML file and describes what a board should be provisioned
//! as before it is installed: either a relay serving one floor, or a switch with its node ID and
//! runtime attributes. The node crate writes it into persistent storage.
//!
//! # Example relay TOML
//!
//! ```toml
//! role = "relay"
//! floor = "first"
//!
//! # Mapping slots are assigned in order, starting at 1
//! [[mappings]]
//! node_id = 0x81
//! output = 1
//!
//! [[mappings]]
//! node_id = 0x82
//! output = 2
//! ```
//!
//! # Example switch TOML
//!
//! ```toml
//! role = "switch"
//! node_id = 2
//! heartbeat_timeout = 10
//! suppress_switch = false
//! debug = true
//! ```
//!
//! Switch node IDs carry the floor in their top bit, and the remaining bits may not be zero: `0`
//! and `0x80` are the relay identities.

use serde::Deserialize;
use snafu::ResultExt as _;
use snafu::Snafu;

use crate::constants::{BLANK_VALUE, MAX_MAPPING_SLOTS, OUTPUT_COUNT, UNMAPPED_NODE_ID};
use crate::floor::{Floor, FLOOR_BIT};

/// Error returned when loading a device config fails
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// An IO error occured while reading the file
    #[snafu(display("IO error: {source}"))]
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// An error occured in the TOML parser
    #[snafu(display("Toml parse error: {source}"))]
    TomlParsing {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
    /// A mapping refers to an output the board does not have
    #[snafu(display("Mapping for node {node_id} uses output {output}, valid outputs are 1 to {OUTPUT_COUNT}"))]
    InvalidOutput {
        /// Node ID of the mapping
        node_id: u8,
        /// The offending output number
        output: u8,
    },
    /// A mapping refers to a node on the other floor, or to a reserved node ID
    #[snafu(display("Node {node_id} cannot be mapped on floor 0x{floor:x}"))]
    UnreachableNode {
        /// Node ID of the mapping
        node_id: u8,
        /// Floor value of the relay
        floor: u8,
    },
    /// More mappings than slots
    #[snafu(display("{count} mappings defined, at most {MAX_MAPPING_SLOTS} are supported"))]
    TooManyMappings {
        /// Number of mappings in the file
        count: usize,
    },
    /// A switch node ID which is zero or a floor value
    #[snafu(display("Invalid switch node ID {node_id}"))]
    InvalidNodeId {
        /// The offending node ID
        node_id: u8,
    },
    /// A heartbeat timeout which cannot be stored
    #[snafu(display("Invalid heartbeat timeout {timeout}"))]
    InvalidHeartbeatTimeout {
        /// The offending timeout
        timeout: u16,
    },
}

/// One mapping of a relay
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Node ID of the button
    pub node_id: u8,
    /// Output number switched by the button
    pub output: u8,
}

/// Provisioning of a relay
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// The floor the relay serves
    pub floor: Floor,
    /// Initial mapping table, slot 1 first
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// Provisioning of a switch
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SwitchNodeConfig {
    /// Base node ID, the first button uses this ID and the following ones count up from it
    pub node_id: u8,
    /// Seconds between heartbeats. Defaults to 0 which disables heartbeats.
    #[serde(default)]
    pub heartbeat_timeout: u16,
    /// Do not send NORMAL frames on button presses
    #[serde(default)]
    pub suppress_switch: bool,
    /// Keep the node awake and drive the status LED
    #[serde(default)]
    pub debug: bool,
}

/// What a board is provisioned as
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum DeviceConfig {
    /// A relay board
    Relay(RelayConfig),
    /// A wall switch
    Switch(SwitchNodeConfig),
}

impl DeviceConfig {
    /// Try to read a device config from a file
    pub fn load(config_path: impl AsRef<std::path::Path>) -> Result<Self, LoadError> {
        let config_str = std::fs::read_to_string(&config_path).context(IoSnafu)?;
        Self::load_from_str(&config_str)
    }

    /// Try to read a config from a &str
    pub fn load_from_str(config_str: &str) -> Result<Self, LoadError> {
        let config: DeviceConfig = toml::from_str(config_str).context(TomlParsingSnafu)?;
        match &config {
            DeviceConfig::Relay(relay) => Self::validate_relay(relay)?,
            DeviceConfig::Switch(switch) => Self::validate_switch(switch)?,
        }
        Ok(config)
    }

    fn validate_relay(relay: &RelayConfig) -> Result<(), LoadError> {
        if relay.mappings.len() > MAX_MAPPING_SLOTS {
            return TooManyMappingsSnafu {
                count: relay.mappings.len(),
            }
            .fail();
        }
        for mapping in &relay.mappings {
            if mapping.output == 0 || mapping.output > OUTPUT_COUNT {
                return InvalidOutputSnafu {
                    node_id: mapping.node_id,
                    output: mapping.output,
                }
                .fail();
            }
            if mapping.node_id == UNMAPPED_NODE_ID || !relay.floor.contains(mapping.node_id) {
                return UnreachableNodeSnafu {
                    node_id: mapping.node_id,
                    floor: relay.floor.value(),
                }
                .fail();
            }
        }
        Ok(())
    }

    fn validate_switch(switch: &SwitchNodeConfig) -> Result<(), LoadError> {
        if switch.node_id & !FLOOR_BIT == 0 {
            return InvalidNodeIdSnafu {
                node_id: switch.node_id,
            }
            .fail();
        }
        if switch.heartbeat_timeout == BLANK_VALUE {
            return InvalidHeartbeatTimeoutSnafu {
                timeout: switch.heartbeat_timeout,
            }
            .fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_relay_config() {
        const TOML: &str = r#"
            role = "relay"
            floor = "first"

            [[mappings]]
            node_id = 0x81
            output = 1

            [[mappings]]
            node_id = 0x85
            output = 30
        "#;

        let config = DeviceConfig::load_from_str(TOML).unwrap();
        let DeviceConfig::Relay(relay) = config else {
            panic!("Expected a relay config");
        };
        assert_eq!(Floor::First, relay.floor);
        assert_eq!(
            vec![
                MappingConfig {
                    node_id: 0x81,
                    output: 1
                },
                MappingConfig {
                    node_id: 0x85,
                    output: 30
                }
            ],
            relay.mappings
        );
    }

    #[test]
    fn test_switch_defaults() {
        const TOML: &str = r#"
            role = "switch"
            node_id = 2
        "#;
        let config = DeviceConfig::load_from_str(TOML).unwrap();
        assert_eq!(
            DeviceConfig::Switch(SwitchNodeConfig {
                node_id: 2,
                heartbeat_timeout: 0,
                suppress_switch: false,
                debug: false,
            }),
            config
        );
    }

    #[test]
    fn test_invalid_output_errors() {
        const TOML: &str = r#"
            role = "relay"
            floor = "ground"
            [[mappings]]
            node_id = 5
            output = 31
        "#;

        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidOutput {
                node_id: 5,
                output: 31
            }
        ));
        assert_contains!(err.to_string().as_str(), "uses output 31");
    }

    #[test]
    fn test_mapping_on_other_floor_errors() {
        const TOML: &str = r#"
            role = "relay"
            floor = "ground"
            [[mappings]]
            node_id = 0x85
            output = 1
        "#;

        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnreachableNode {
                node_id: 0x85,
                floor: 0
            }
        ));
    }

    #[test]
    fn test_floor_value_is_not_a_switch_id() {
        const TOML: &str = r#"
            role = "switch"
            node_id = 128
        "#;
        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(err, LoadError::InvalidNodeId { node_id: 128 }));
        assert_contains!(err.to_string().as_str(), "Invalid switch node ID 128");
    }

    #[test]
    fn test_unknown_role_errors() {
        const TOML: &str = r#"
            role = "dimmer"
        "#;
        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(err, LoadError::TomlParsing { .. }));
    }
}
