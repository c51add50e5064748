//! Merged joystick device using evdev/uinput
//!
//! Creates the virtual joystick that games and applications see. Every
//! topology change builds a new uinput device with the requested channel
//! counts and swaps it in.

use super::{button_code, DeviceShape, LogicalDevice};
use crate::error::DeviceError;
use crate::mapping::ChannelKind;
use crate::source::{AXIS_MAX, AXIS_MIN};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AbsInfo, AbsoluteAxisType, AttributeSet, EventType, InputEvent, Key, UinputAbsSetup,
};
use tracing::{debug, info};

/// uinput-backed [`LogicalDevice`]
#[derive(Default)]
pub struct VirtualJoystick {
    device: Option<VirtualDevice>,
    /// Events collected by `report` until the next `sync`
    pending: Vec<InputEvent>,
}

impl VirtualJoystick {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(shape: &DeviceShape) -> Result<VirtualDevice, DeviceError> {
        let mut builder = VirtualDeviceBuilder::new()
            .map_err(DeviceError::Create)?
            .name(shape.name.as_str());

        if shape.button_total > 0 {
            let mut keys = AttributeSet::<Key>::new();
            for channel in 0..shape.button_total {
                keys.insert(Key::new(button_code(channel)));
            }
            builder = builder.with_keys(&keys).map_err(DeviceError::Create)?;
        }

        for channel in 0..shape.axis_total {
            let abs_setup = UinputAbsSetup::new(
                AbsoluteAxisType(channel as u16),
                AbsInfo::new(0, AXIS_MIN, AXIS_MAX, 0, 0, 0),
            );
            builder = builder
                .with_absolute_axis(&abs_setup)
                .map_err(DeviceError::Create)?;
        }

        builder.build().map_err(DeviceError::Create)
    }
}

impl LogicalDevice for VirtualJoystick {
    fn register(&mut self, shape: &DeviceShape) -> Result<(), DeviceError> {
        let device = Self::build(shape)?;
        info!(
            "Registered '{}' with {} axes, {} buttons",
            shape.name, shape.axis_total, shape.button_total
        );

        // old node goes away only once the new one exists
        self.device = Some(device);
        self.pending.clear();
        Ok(())
    }

    fn unregister(&mut self) {
        if self.device.take().is_some() {
            debug!("Unregistered virtual joystick");
        }
        self.pending.clear();
    }

    fn report(&mut self, kind: ChannelKind, channel: usize, value: i32) -> Result<(), DeviceError> {
        let event = match kind {
            ChannelKind::Axis => {
                InputEvent::new(EventType::ABSOLUTE, channel as u16, value.clamp(AXIS_MIN, AXIS_MAX))
            }
            ChannelKind::Button => InputEvent::new(EventType::KEY, button_code(channel), value),
        };
        self.pending.push(event);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        let Some(device) = self.device.as_mut() else {
            self.pending.clear();
            return Err(DeviceError::NotRegistered);
        };

        if self.pending.is_empty() {
            return Ok(());
        }

        // emit() terminates the batch with SYN_REPORT
        let result = device.emit(&self.pending).map_err(DeviceError::Emit);
        self.pending.clear();
        result
    }
}
