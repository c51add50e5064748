//! Host-neutral description of a physical input device
//!
//! The host adapter fills a [`DeviceDescriptor`] from whatever the platform
//! reports; the core only ever looks at these plain values. Capability codes
//! follow the Linux input event code numbering.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

pub const ABS_X: u16 = 0x00;
pub const ABS_THROTTLE: u16 = 0x06;
pub const ABS_WHEEL: u16 = 0x08;
/// Number of absolute axis codes
pub const ABS_CNT: usize = 0x40;

pub const BTN_MISC: u16 = 0x100;
pub const BTN_JOYSTICK: u16 = 0x120;
pub const BTN_GAMEPAD: u16 = 0x130;
pub const BTN_DIGI: u16 = 0x140;
pub const BTN_TOUCH: u16 = 0x14a;
pub const BTN_TRIGGER_HAPPY: u16 = 0x2c0;
pub const KEY_MAX: u16 = 0x2ff;
/// Number of button codes from `BTN_MISC` through `KEY_MAX`
pub const BUTTON_CNT: usize = (KEY_MAX - BTN_MISC + 1) as usize;

/// Stable 64-bit identity of a device model on a bus
///
/// Built from the bus type, vendor, product and version words of the input id,
/// so the same stick gets the same fingerprint after a replug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Identifies no device; never registered
    pub const NONE: Fingerprint = Fingerprint(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Fingerprint)
    }
}

/// Bus/vendor/product/version words of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputId {
    pub bus_type: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

impl InputId {
    pub fn new(bus_type: u16, vendor: u16, product: u16, version: u16) -> Self {
        Self {
            bus_type,
            vendor,
            product,
            version,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(
            (u64::from(self.bus_type) << 48)
                | (u64::from(self.vendor) << 32)
                | (u64::from(self.product) << 16)
                | u64::from(self.version),
        )
    }
}

/// Calibration reported by the platform for one absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxis {
    pub code: u16,
    pub info: AbsInfo,
}

/// Everything the core needs to know about a physical device on first contact
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    pub name: String,
    pub id: InputId,
    /// Absolute axes the device has, with their calibration
    pub axes: Vec<AbsAxis>,
    /// Supported key/button codes
    pub keys: Vec<u16>,
    /// Key/button codes held down when the device was opened
    pub pressed: Vec<u16>,
}

impl DeviceDescriptor {
    pub fn fingerprint(&self) -> Fingerprint {
        self.id.fingerprint()
    }

    pub fn has_key(&self, code: u16) -> bool {
        self.keys.contains(&code)
    }

    pub fn has_axis(&self, code: u16) -> bool {
        self.axes.iter().any(|axis| axis.code == code)
    }

    pub fn axis(&self, code: u16) -> Option<&AbsAxis> {
        self.axes.iter().find(|axis| axis.code == code)
    }

    /// Whether the device looks like a joystick or gamepad
    ///
    /// Touchpads and tablets also report absolute X, so anything carrying
    /// `BTN_TOUCH` or `BTN_DIGI` is excluded up front.
    pub fn is_joystick_like(&self) -> bool {
        if self.has_key(BTN_TOUCH) || self.has_key(BTN_DIGI) {
            return false;
        }

        [ABS_X, ABS_WHEEL, ABS_THROTTLE]
            .iter()
            .any(|&code| self.has_axis(code))
            || [BTN_JOYSTICK, BTN_GAMEPAD, BTN_TRIGGER_HAPPY]
                .iter()
                .any(|&code| self.has_key(code))
    }
}
