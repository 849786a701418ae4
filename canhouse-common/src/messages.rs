//! Wire format of the frames exchanged between switches and relays
//!
//! Every frame uses a standard 11-bit identifier built from a [`CanHeader`]: the
//! [`MessageClass`] sits in the top three bits, so acceptance filters can select a class by
//! masking the high bits only, and the low byte carries the node or floor identifier.
use int_enum::IntEnum;
use snafu::Snafu;

use crate::constants::{operators, FIRMWARE_VERSION};

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// Mask of the bits valid in a standard identifier
pub const STD_ID_MASK: u16 = 0x7FF;

/// Class of a frame, carried in the top three identifier bits
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageClass {
    /// A button was pressed on a switch
    Normal = 0,
    /// Periodic liveness and diagnostics from a switch
    Heartbeat = 1,
    /// Identity or mapping change, addressed strictly to one node
    Config = 2,
    /// Operation on relay outputs, addressed to a floor
    Complex = 3,
    /// A relay's answer to a GET operation
    ComplexReply = 4,
    /// Request for a relay's full mapping table
    Mappings = 5,
    /// One frame of a mapping table dump
    MappingsReply = 6,
}

/// The application level header of a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanHeader {
    /// Class of the frame
    pub class: MessageClass,
    /// Node or floor identifier
    pub node_id: u8,
}

impl CanHeader {
    /// Create a new header
    pub const fn new(class: MessageClass, node_id: u8) -> Self {
        Self { class, node_id }
    }

    /// The 11-bit identifier this header is sent with
    pub const fn raw(&self) -> u16 {
        ((self.class as u16) << 8) | self.node_id as u16
    }

    /// Decode a header from an 11-bit identifier
    pub fn from_raw(id: u16) -> Result<Self, MessageError> {
        if id & !STD_ID_MASK != 0 {
            return InvalidIdSnafu { id }.fail();
        }
        let class = MessageClass::try_from((id >> 8) as u8)
            .map_err(|_| MessageError::UnknownClass { id })?;
        Ok(Self {
            class,
            node_id: (id & 0xFF) as u8,
        })
    }
}

impl From<CanHeader> for u16 {
    fn from(value: CanHeader) -> Self {
        value.raw()
    }
}

/// A classic CAN frame with a standard identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// Payload buffer, only the first `dlc` bytes are valid
    pub data: [u8; MAX_DATA_LENGTH],
    /// Payload length
    pub dlc: u8,
    /// The 11-bit identifier
    pub id: u16,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: 0,
        }
    }
}

impl CanMessage {
    /// Create a frame from a raw identifier and payload
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than 8 bytes
    pub fn new(id: u16, data: &[u8]) -> Self {
        let dlc = data.len();
        if dlc > MAX_DATA_LENGTH {
            panic!("Data length exceeds maximum size of {} bytes", MAX_DATA_LENGTH);
        }
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(data);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
        }
    }

    /// Create a frame addressed by `header`
    pub fn with_header(header: CanHeader, data: &[u8]) -> Self {
        Self::new(header.raw(), data)
    }

    /// The raw identifier
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The valid part of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// Decode the header from the identifier
    pub fn header(&self) -> Result<CanHeader, MessageError> {
        CanHeader::from_raw(self.id)
    }
}

/// Operation requested by a COMPLEX frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Flip the output
    Toggle,
    /// Switch the output on
    On,
    /// Switch the output off
    Off,
    /// Report output status, never changes anything
    Get,
}

impl Operation {
    /// Decode an operation byte. The highest operator bit set wins.
    pub fn from_byte(b: u8) -> Result<Self, MessageError> {
        if b & operators::SWITCH != 0 {
            Ok(Self::Toggle)
        } else if b & operators::SET != 0 {
            Ok(Self::On)
        } else if b & operators::CLEAR != 0 {
            Ok(Self::Off)
        } else if b & operators::GET != 0 {
            Ok(Self::Get)
        } else {
            InvalidOperationSnafu { value: b }.fail()
        }
    }

    /// The operation byte sent on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Toggle => operators::SWITCH,
            Self::On => operators::SET,
            Self::Off => operators::CLEAR,
            Self::Get => operators::GET,
        }
    }

    /// New electrical state of an output currently at `current`
    ///
    /// Returns None for [`Operation::Get`].
    pub fn apply(self, current: bool) -> Option<bool> {
        match self {
            Self::Toggle => Some(!current),
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Get => None,
        }
    }
}

/// A button press reported by a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchEvent {
    /// Identifier of the button (switch base node ID plus pin index)
    pub node_id: u8,
    /// Button state bit
    pub pressed: bool,
}

impl From<SwitchEvent> for CanMessage {
    fn from(value: SwitchEvent) -> Self {
        let header = CanHeader::new(MessageClass::Normal, value.node_id);
        CanMessage::with_header(header, &[(value.pressed as u8) << 7])
    }
}

/// Periodic liveness frame sent by a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Base node ID of the switch
    pub node_id: u8,
    /// Last known button state
    pub pressed: bool,
    /// CAN transmit error counter
    pub tx_errors: u8,
    /// CAN receive error counter
    pub rx_errors: u8,
    /// Firmware version of the switch
    pub firmware_version: u8,
    /// Seconds since boot, truncated to 16 bits
    pub uptime_secs: u16,
}

impl From<Heartbeat> for CanMessage {
    fn from(value: Heartbeat) -> Self {
        let header = CanHeader::new(MessageClass::Heartbeat, value.node_id);
        let uptime = value.uptime_secs.to_be_bytes();
        CanMessage::with_header(
            header,
            &[
                (value.pressed as u8) << 7,
                value.tx_errors,
                value.rx_errors,
                value.firmware_version,
                uptime[0],
                uptime[1],
            ],
        )
    }
}

/// An operation addressed to a relay
///
/// When `node_id` equals the relay floor the operation applies to all used outputs, otherwise
/// the output mapped to `node_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexRequest {
    /// Target node or floor identifier
    pub node_id: u8,
    /// Requested operation
    pub operation: Operation,
}

impl From<ComplexRequest> for CanMessage {
    fn from(value: ComplexRequest) -> Self {
        let header = CanHeader::new(MessageClass::Complex, value.node_id);
        CanMessage::with_header(header, &[value.operation.to_byte()])
    }
}

/// Status of all used outputs of a relay, as reported in a COMPLEX_REPLY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    /// Number of used outputs
    pub used_outputs: u8,
    /// Output states, MSB first, output 1 in the top bit of the first byte
    pub bitmap: [u8; 4],
}

impl StatusSnapshot {
    /// Size of the snapshot on the wire
    pub const SIZE: usize = 5;

    /// Serialized form, count byte first
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0; Self::SIZE];
        out[0] = self.used_outputs;
        out[1..].copy_from_slice(&self.bitmap);
        out
    }

    /// Parse a snapshot
    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < Self::SIZE {
            return Err(MessageError::MessageTooShort);
        }
        let mut bitmap = [0; 4];
        bitmap.copy_from_slice(&data[1..Self::SIZE]);
        Ok(Self {
            used_outputs: data[0],
            bitmap,
        })
    }

    /// State of the output with the given 1-based number
    pub fn is_on(&self, output_number: u8) -> bool {
        if output_number == 0 || output_number > self.used_outputs || output_number > 32 {
            return false;
        }
        let idx = (output_number - 1) as usize;
        self.bitmap[idx / 8] & (0x80 >> (idx % 8)) != 0
    }
}

/// A relay's answer to a GET operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    /// Floor value of the replying relay
    pub floor_value: u8,
    /// Output status
    pub snapshot: StatusSnapshot,
    /// CAN transmit error counter
    pub tx_errors: u8,
    /// CAN receive error counter
    pub rx_errors: u8,
    /// Firmware version of the relay
    pub firmware_version: u8,
}

impl StatusReply {
    /// Build a reply carrying this firmware's version
    pub fn new(floor_value: u8, snapshot: StatusSnapshot, tx_errors: u8, rx_errors: u8) -> Self {
        Self {
            floor_value,
            snapshot,
            tx_errors,
            rx_errors,
            firmware_version: FIRMWARE_VERSION,
        }
    }
}

impl From<StatusReply> for CanMessage {
    fn from(value: StatusReply) -> Self {
        let mut data = [0u8; MAX_DATA_LENGTH];
        data[0..StatusSnapshot::SIZE].copy_from_slice(&value.snapshot.to_bytes());
        data[5] = value.tx_errors;
        data[6] = value.rx_errors;
        data[7] = value.firmware_version;
        CanMessage::with_header(
            CanHeader::new(MessageClass::ComplexReply, value.floor_value),
            &data,
        )
    }
}

/// Change of one relay mapping slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingUpdate {
    /// Floor value of the addressed relay
    pub floor_value: u8,
    /// Mapping slot, 1-based
    pub slot: u8,
    /// Node ID to map
    pub node_id: u8,
    /// Output number to map it to
    pub output_number: u8,
}

impl From<MappingUpdate> for CanMessage {
    fn from(value: MappingUpdate) -> Self {
        CanMessage::with_header(
            CanHeader::new(MessageClass::Config, value.floor_value),
            &[value.slot, value.node_id, value.output_number],
        )
    }
}

/// Attribute of a switch changed by a CONFIG frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConfigAttribute {
    /// Base node ID of the switch
    NodeId = 0,
    /// Heartbeat interval in seconds
    HeartbeatTimeout = 1,
    /// Stop sending NORMAL frames
    SuppressSwitch = 2,
    /// Debug mode (status LED, no sleep)
    Debug = 3,
}

/// Change of one switch attribute
///
/// Packed into a big-endian word: top two bits select the attribute, low 14 bits the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    /// Node ID of the addressed switch
    pub node_id: u8,
    /// The attribute to change
    pub attribute: ConfigAttribute,
    /// The new value
    pub value: u16,
}

impl SwitchConfig {
    /// Mask of the value bits
    pub const VALUE_MASK: u16 = 0x3FFF;

    /// Unpack a config word
    pub fn from_word(node_id: u8, word: u16) -> Self {
        let attribute = match word >> 14 {
            0 => ConfigAttribute::NodeId,
            1 => ConfigAttribute::HeartbeatTimeout,
            2 => ConfigAttribute::SuppressSwitch,
            _ => ConfigAttribute::Debug,
        };
        Self {
            node_id,
            attribute,
            value: word & Self::VALUE_MASK,
        }
    }

    /// Pack into a config word
    pub fn to_word(&self) -> u16 {
        ((u8::from(self.attribute) as u16) << 14) | (self.value & Self::VALUE_MASK)
    }

    /// Returns false for values the switch must ignore
    ///
    /// An all-ones value is the blank storage pattern, and node ID and heartbeat timeout can
    /// never be zero. Node IDs must also fit a byte.
    pub fn is_valid(&self) -> bool {
        if self.value == Self::VALUE_MASK {
            return false;
        }
        match self.attribute {
            ConfigAttribute::NodeId => self.value != 0 && self.value <= 0xFF,
            ConfigAttribute::HeartbeatTimeout => self.value != 0,
            ConfigAttribute::SuppressSwitch | ConfigAttribute::Debug => true,
        }
    }
}

impl From<SwitchConfig> for CanMessage {
    fn from(value: SwitchConfig) -> Self {
        CanMessage::with_header(
            CanHeader::new(MessageClass::Config, value.node_id),
            &value.to_word().to_be_bytes(),
        )
    }
}

/// Request for a relay's mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingsRequest {
    /// Floor value of the addressed relay
    pub floor_value: u8,
}

impl From<MappingsRequest> for CanMessage {
    fn from(value: MappingsRequest) -> Self {
        CanMessage::with_header(CanHeader::new(MessageClass::Mappings, value.floor_value), &[])
    }
}

/// One frame of a mapping dump, see [`crate::mapping_dump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingsReply {
    /// Floor value of the replying relay
    pub floor_value: u8,
    /// `(node_id, output_number)` pairs
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid bytes in `data`
    pub len: u8,
}

impl MappingsReply {
    /// The `(node_id, output_number)` pairs in this frame
    pub fn pairs(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.data[..self.len as usize]
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
    }
}

/// Any frame of the house protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseMessage {
    /// NORMAL
    SwitchEvent(SwitchEvent),
    /// HEARTBEAT
    Heartbeat(Heartbeat),
    /// CONFIG with a 3 byte payload
    MappingUpdate(MappingUpdate),
    /// CONFIG with a 2 byte payload
    SwitchConfig(SwitchConfig),
    /// COMPLEX
    Complex(ComplexRequest),
    /// COMPLEX_REPLY
    StatusReply(StatusReply),
    /// MAPPINGS
    MappingsRequest(MappingsRequest),
    /// MAPPINGS_REPLY
    MappingsReply(MappingsReply),
}

fn require_len(payload: &[u8], len: usize) -> Result<(), MessageError> {
    if payload.len() < len {
        Err(MessageError::MessageTooShort)
    } else {
        Ok(())
    }
}

impl TryFrom<CanMessage> for HouseMessage {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let header = msg.header()?;
        let node_id = header.node_id;
        let payload = msg.data();
        match header.class {
            MessageClass::Normal => {
                require_len(payload, 1)?;
                Ok(HouseMessage::SwitchEvent(SwitchEvent {
                    node_id,
                    pressed: payload[0] & 0x80 != 0,
                }))
            }
            MessageClass::Heartbeat => {
                require_len(payload, 6)?;
                Ok(HouseMessage::Heartbeat(Heartbeat {
                    node_id,
                    pressed: payload[0] & 0x80 != 0,
                    tx_errors: payload[1],
                    rx_errors: payload[2],
                    firmware_version: payload[3],
                    uptime_secs: u16::from_be_bytes([payload[4], payload[5]]),
                }))
            }
            MessageClass::Config => {
                if payload.len() >= 3 {
                    Ok(HouseMessage::MappingUpdate(MappingUpdate {
                        floor_value: node_id,
                        slot: payload[0],
                        node_id: payload[1],
                        output_number: payload[2],
                    }))
                } else {
                    require_len(payload, 2)?;
                    let word = u16::from_be_bytes([payload[0], payload[1]]);
                    Ok(HouseMessage::SwitchConfig(SwitchConfig::from_word(node_id, word)))
                }
            }
            MessageClass::Complex => {
                require_len(payload, 1)?;
                Ok(HouseMessage::Complex(ComplexRequest {
                    node_id,
                    operation: Operation::from_byte(payload[0])?,
                }))
            }
            MessageClass::ComplexReply => {
                require_len(payload, MAX_DATA_LENGTH)?;
                Ok(HouseMessage::StatusReply(StatusReply {
                    floor_value: node_id,
                    snapshot: StatusSnapshot::from_bytes(payload)?,
                    tx_errors: payload[5],
                    rx_errors: payload[6],
                    firmware_version: payload[7],
                }))
            }
            MessageClass::Mappings => Ok(HouseMessage::MappingsRequest(MappingsRequest {
                floor_value: node_id,
            })),
            MessageClass::MappingsReply => Ok(HouseMessage::MappingsReply(MappingsReply {
                floor_value: node_id,
                data: msg.data,
                len: msg.dlc,
            })),
        }
    }
}

/// Errors raised while decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// The payload is shorter than its class requires
    MessageTooShort,
    /// The identifier does not fit in 11 bits
    #[snafu(display("Identifier 0x{id:x} is not a standard identifier"))]
    InvalidId {
        /// The offending identifier
        id: u16,
    },
    /// The class bits do not name a known class
    #[snafu(display("Unknown message class in identifier 0x{id:x}"))]
    UnknownClass {
        /// The offending identifier
        id: u16,
    },
    /// No operator bit is set in the operation byte
    #[snafu(display("Invalid operation byte 0x{value:x}"))]
    InvalidOperation {
        /// The operation byte
        value: u8,
    },
}
