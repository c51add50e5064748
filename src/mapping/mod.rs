//! Destination channel routing
//!
//! Two instances of [`MappingTable`] (one per [`ChannelKind`]) map every
//! channel of the logical device to a `(source fingerprint, source ordinal)`
//! pair. Slots reference sources by fingerprint only, so a mapping survives
//! while its source is unplugged and comes back when it is replugged.

pub mod table;

pub use table::{MappingSlot, MappingTable};

use std::fmt;

/// Maximum number of axis channels (one per absolute axis code)
pub const MAX_AXES: usize = crate::source::descriptor::ABS_CNT;
/// Maximum number of button channels
pub const MAX_BUTTONS: usize = crate::source::descriptor::BUTTON_CNT;

/// Kind of a channel, on a source or on the logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Axis,
    Button,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Axis, ChannelKind::Button];

    /// Platform limit on the number of channels of this kind
    pub fn limit(&self) -> usize {
        match self {
            ChannelKind::Axis => MAX_AXES,
            ChannelKind::Button => MAX_BUTTONS,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Axis => write!(f, "axis"),
            ChannelKind::Button => write!(f, "button"),
        }
    }
}
