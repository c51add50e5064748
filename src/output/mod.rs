//! Logical (merged) device side of the merger
//!
//! The [`worker`] is the only place that talks to a [`LogicalDevice`]. Event
//! callbacks and topology changes reach it through the bounded [`queue`].

pub mod queue;
pub mod virtual_joystick;
pub mod worker;

pub use queue::{bounded, QueueConsumer, QueueEntry, QueueProducer};
pub use virtual_joystick::VirtualJoystick;
pub use worker::{WorkerHandle, WorkerReport};

use crate::error::DeviceError;
use crate::mapping::ChannelKind;
use crate::source::descriptor::{BTN_JOYSTICK, BTN_MISC, KEY_MAX};

/// Advertised channel layout of the logical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceShape {
    pub name: String,
    pub axis_total: usize,
    pub button_total: usize,
}

impl DeviceShape {
    /// No channels at all; the device is not registered
    pub fn is_empty(&self) -> bool {
        self.axis_total == 0 && self.button_total == 0
    }
}

/// Shape plus the channel values to replay right after registering it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub shape: DeviceShape,
    pub burst: Vec<ChannelValue>,
}

/// One value of one destination channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValue {
    pub kind: ChannelKind,
    pub channel: usize,
    pub value: i32,
}

/// Host representation of the merged device
///
/// `register` replaces any previous registration: on failure the previous
/// device stays in place.
pub trait LogicalDevice: Send {
    fn register(&mut self, shape: &DeviceShape) -> Result<(), DeviceError>;
    fn unregister(&mut self);
    fn report(&mut self, kind: ChannelKind, channel: usize, value: i32) -> Result<(), DeviceError>;
    fn sync(&mut self) -> Result<(), DeviceError>;
}

/// Key code advertised for button channel `channel`
///
/// Channels start at `BTN_JOYSTICK` and wrap past `KEY_MAX` into the misc
/// range, mirroring how source buttons are numbered.
pub fn button_code(channel: usize) -> u16 {
    let code = channel + usize::from(BTN_JOYSTICK);
    if code > usize::from(KEY_MAX) {
        (code - usize::from(KEY_MAX) - 1 + usize::from(BTN_MISC)) as u16
    } else {
        code as u16
    }
}
