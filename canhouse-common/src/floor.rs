//! Floor scoping of node identifiers
//!
//! The top bit of every 8-bit node identifier selects the floor. A relay is provisioned with the
//! floor value itself (`0x00` or `0x80`), and switches on that floor use identifiers above it.

/// Mask selecting the floor bit of a node identifier
pub const FLOOR_BIT: u8 = 0b1000_0000;

/// The floor a node lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum Floor {
    /// Ground floor, floor bit clear
    Ground = 0,
    /// First floor, floor bit set
    First = FLOOR_BIT,
}

/// Returned when a stored floor value is neither `0x00` nor `0x80`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidFloorError(pub u16);

impl core::fmt::Display for InvalidFloorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid floor value 0x{:x}", self.0)
    }
}
impl core::error::Error for InvalidFloorError {}

impl Floor {
    /// The floor encoded in a node identifier
    pub const fn of(node_id: u8) -> Self {
        if node_id & FLOOR_BIT == 0 {
            Floor::Ground
        } else {
            Floor::First
        }
    }

    /// The wire value of the floor, which is also the relay's own node identifier
    pub const fn value(&self) -> u8 {
        *self as u8
    }

    /// Returns true when `node_id` carries this floor's bit
    pub const fn contains(&self, node_id: u8) -> bool {
        node_id & FLOOR_BIT == self.value()
    }
}

impl TryFrom<u16> for Floor {
    type Error = InvalidFloorError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Floor::Ground),
            0x80 => Ok(Floor::First),
            _ => Err(InvalidFloorError(value)),
        }
    }
}

impl From<Floor> for u8 {
    fn from(value: Floor) -> Self {
        value.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_of_node() {
        assert_eq!(Floor::Ground, Floor::of(5));
        assert_eq!(Floor::First, Floor::of(129));
        assert!(Floor::First.contains(0x80));
        assert!(!Floor::Ground.contains(0x81));
    }

    #[test]
    fn test_floor_from_stored_value() {
        assert_eq!(Ok(Floor::First), Floor::try_from(0x80u16));
        assert_eq!(Err(InvalidFloorError(0x81)), Floor::try_from(0x81u16));
    }
}
