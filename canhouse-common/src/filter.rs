//! Acceptance filters
//!
//! Nodes only ever install two kinds of filter. A relay listens to NORMAL and COMPLEX frames for
//! any node on its floor, and to CONFIG and MAPPINGS frames addressed exactly to it. A switch
//! listens to CONFIG frames addressed exactly to its node ID.

use crate::floor::FLOOR_BIT;
use crate::messages::{CanHeader, MessageClass};

/// Which identifier bits a filter compares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterScope {
    /// Class bits plus the floor bit of the node identifier
    FloorAndClass,
    /// All eleven identifier bits
    Strict,
}

impl FilterScope {
    /// The identifier mask of this scope
    pub const fn mask(&self) -> u16 {
        match self {
            FilterScope::FloorAndClass => 0x700 | FLOOR_BIT as u16,
            FilterScope::Strict => 0x7FF,
        }
    }
}

/// A hardware acceptance filter: frames pass when `id & mask == filter_id & mask`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptanceFilter {
    /// Compared bits
    pub scope: FilterScope,
    /// Class to accept
    pub class: MessageClass,
    /// Floor value or node ID to accept
    pub value: u8,
}

impl AcceptanceFilter {
    /// Accept `class` frames for any node on the floor of `value`
    pub const fn floor_and_class(class: MessageClass, value: u8) -> Self {
        Self {
            scope: FilterScope::FloorAndClass,
            class,
            value,
        }
    }

    /// Accept `class` frames addressed exactly to `value`
    pub const fn strict(class: MessageClass, value: u8) -> Self {
        Self {
            scope: FilterScope::Strict,
            class,
            value,
        }
    }

    /// The filter identifier
    pub const fn id(&self) -> u16 {
        CanHeader::new(self.class, self.value).raw()
    }

    /// The filter mask
    pub const fn mask(&self) -> u16 {
        self.scope.mask()
    }

    /// Returns true if a frame with identifier `id` passes this filter
    pub const fn accepts(&self, id: u16) -> bool {
        id & self.mask() == self.id() & self.mask()
    }
}
