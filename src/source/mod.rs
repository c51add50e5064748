//! Physical input sources
//!
//! A [`Source`] is created the first time a device fingerprint shows up and is
//! kept across replugs while it is merged. Its capabilities are renumbered
//! into dense ordinals so that routing never depends on raw platform codes.
//!
//! # State Machine
//!
//! ```text
//!            merge                host disconnect
//! Online ──────────► Merged ───────────────────► Disconnected
//!    ▲                 │  ▲                            │
//!    └─────────────────┘  └──── host reconnect ────────┘
//!          unmerge
//!
//! Online ──host disconnect──► (removed)
//! Disconnected ──unmerge────► (removed)
//! ```

pub mod correction;
pub mod descriptor;
pub mod registry;

pub use correction::{Correction, AXIS_MAX, AXIS_MIN};
pub use descriptor::{AbsAxis, AbsInfo, DeviceDescriptor, Fingerprint, InputId};
pub use registry::{Connected, Disconnected, SourceRegistry, Unmerged};

use crate::host::SourceConnection;
use crate::mapping::ChannelKind;
use chrono::{DateTime, Local};
use descriptor::{ABS_CNT, BTN_JOYSTICK, BTN_MISC, KEY_MAX};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Online,
    Merged,
    Disconnected,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceState::Online => "ONLINE",
            SourceState::Merged => "MERGED",
            SourceState::Disconnected => "DISCONNECTED",
        };
        // honour width/alignment for the status table
        f.pad(name)
    }
}

/// Dense ordinal numbering of the raw codes a device actually has
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    to_ordinal: HashMap<u16, usize>,
    to_code: Vec<u16>,
}

impl CapabilityMap {
    fn from_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        let mut map = Self::default();
        for code in codes {
            if map.to_ordinal.contains_key(&code) {
                continue;
            }
            map.to_ordinal.insert(code, map.to_code.len());
            map.to_code.push(code);
        }
        map
    }

    pub fn ordinal(&self, code: u16) -> Option<usize> {
        self.to_ordinal.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.to_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_code.is_empty()
    }
}

/// One physical device known to the merger
pub struct Source {
    id: Fingerprint,
    name: String,
    axes: CapabilityMap,
    buttons: CapabilityMap,
    corrections: Vec<Correction>,
    axis_values: Vec<i32>,
    button_values: Vec<i32>,
    state: SourceState,
    connection: Option<Box<dyn SourceConnection>>,
    since: DateTime<Local>,
}

impl Source {
    /// Builds a source from a device seen for the first time
    ///
    /// Axes are numbered in code order. Buttons are numbered joystick range
    /// first, then the misc range below `BTN_JOYSTICK`.
    pub fn create(descriptor: &DeviceDescriptor, connection: Box<dyn SourceConnection>) -> Self {
        let mut axis_codes: Vec<u16> = descriptor
            .axes
            .iter()
            .map(|axis| axis.code)
            .filter(|&code| (code as usize) < ABS_CNT)
            .collect();
        axis_codes.sort_unstable();

        let mut key_codes: Vec<u16> = descriptor
            .keys
            .iter()
            .copied()
            .filter(|&code| (BTN_MISC..=KEY_MAX).contains(&code))
            .collect();
        key_codes.sort_unstable();
        let (misc, joystick): (Vec<u16>, Vec<u16>) =
            key_codes.into_iter().partition(|&code| code < BTN_JOYSTICK);

        let axes = CapabilityMap::from_codes(axis_codes);
        let buttons = CapabilityMap::from_codes(joystick.into_iter().chain(misc));

        let corrections = axes
            .to_code
            .iter()
            .map(|&code| {
                descriptor
                    .axis(code)
                    .map(|axis| Correction::from_abs_info(&axis.info))
                    .unwrap_or(Correction::Identity)
            })
            .collect();

        let mut source = Self {
            id: descriptor.fingerprint(),
            name: descriptor.name.clone(),
            axis_values: vec![0; axes.len()],
            button_values: vec![0; buttons.len()],
            axes,
            buttons,
            corrections,
            state: SourceState::Online,
            connection: Some(connection),
            since: Local::now(),
        };
        source.reseed(descriptor);
        source
    }

    pub fn id(&self) -> Fingerprint {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Time of the last state transition
    pub fn since(&self) -> DateTime<Local> {
        self.since
    }

    pub fn count(&self, kind: ChannelKind) -> usize {
        self.capabilities(kind).len()
    }

    pub fn capabilities(&self, kind: ChannelKind) -> &CapabilityMap {
        match kind {
            ChannelKind::Axis => &self.axes,
            ChannelKind::Button => &self.buttons,
        }
    }

    /// Last known value of a capability (corrected for axes)
    pub fn value(&self, kind: ChannelKind, ordinal: usize) -> i32 {
        let values = match kind {
            ChannelKind::Axis => &self.axis_values,
            ChannelKind::Button => &self.button_values,
        };
        values.get(ordinal).copied().unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Stores a raw reading and returns `(ordinal, value)` as routed
    ///
    /// Unknown codes yield `None`. Axis readings are corrected first.
    pub fn record(&mut self, kind: ChannelKind, code: u16, raw: i32) -> Option<(usize, i32)> {
        let ordinal = self.capabilities(kind).ordinal(code)?;
        let value = match kind {
            ChannelKind::Axis => {
                let value = self.corrections[ordinal].apply(raw);
                self.axis_values[ordinal] = value;
                value
            }
            ChannelKind::Button => {
                self.button_values[ordinal] = raw;
                raw
            }
        };
        Some((ordinal, value))
    }

    /// Reloads current values from a (re)connected device
    fn reseed(&mut self, descriptor: &DeviceDescriptor) {
        for (ordinal, &code) in self.axes.to_code.iter().enumerate() {
            if let Some(axis) = descriptor.axis(code) {
                self.axis_values[ordinal] = self.corrections[ordinal].apply(axis.info.value);
            }
        }
        for (ordinal, &code) in self.buttons.to_code.iter().enumerate() {
            self.button_values[ordinal] = i32::from(descriptor.pressed.contains(&code));
        }
    }

    fn set_state(&mut self, state: SourceState) {
        self.state = state;
        self.since = Local::now();
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("axes", &self.axes.len())
            .field("buttons", &self.buttons.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
