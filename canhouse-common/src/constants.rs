//! Constants shared by relay and switch nodes

/// Firmware version byte reported in heartbeat and status reply frames
pub const FIRMWARE_VERSION: u8 = 12;

/// Number of physical outputs on a relay board
pub const OUTPUT_COUNT: u8 = 30;

/// Highest mapping slot number. Slot numbers travel as a single byte in CONFIG frames.
pub const MAX_MAPPING_SLOTS: usize = 255;

/// Node ID which is never matched by a mapping. Also the node half of the erase pair.
pub const UNMAPPED_NODE_ID: u8 = 0xFF;

/// Output number half of the erase pair
pub const ERASE_OUTPUT: u8 = 0xFF;

/// Value read back from a bucket which has never been written
pub const BLANK_VALUE: u16 = 0xFFFF;

/// Bucket numbers used in persistent storage
pub mod buckets {
    /// Relay: the floor the relay serves. Slot buckets follow, starting at 1.
    pub const FLOOR: u16 = 0;
    /// Relay: bucket holding mapping slot 1
    pub const FIRST_MAPPING: u16 = 1;

    /// Switch: the node ID
    pub const NODE_ID: u16 = 0;
    /// Switch: heartbeat timeout in seconds
    pub const HEARTBEAT_TIMEOUT: u16 = 1;
    /// Switch: suppress sending NORMAL frames
    pub const SUPPRESS_SWITCH: u16 = 2;
    /// Switch: debug mode
    pub const DEBUG: u16 = 3;
}

/// Operation bits carried in a COMPLEX frame
pub mod operators {
    /// Toggle the output
    pub const SWITCH: u8 = 0b1000_0000;
    /// Switch the output on
    pub const SET: u8 = 0b0100_0000;
    /// Switch the output off
    pub const CLEAR: u8 = 0b0010_0000;
    /// Query output status
    pub const GET: u8 = 0b0001_0000;
}
