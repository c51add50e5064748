//! Boundary between the merger core and the physical input host
//!
//! The host discovers devices, asks the core whether it wants them, hands over
//! a [`SourceConnection`] for each accepted device and then feeds raw events
//! through [`InputHandler::event`]. The core never reaches into the host's
//! device objects directly.
//!
//! ```text
//! Host ──matches/connect──► InputHandler (Engine)
//!      ──event───────────►  (fast path, never blocks)
//!      ──disconnect──────►
//! ```

pub mod evdev_host;

pub use evdev_host::{EvdevConnection, EvdevHost};

use crate::error::HostError;
use crate::source::{DeviceDescriptor, Fingerprint};

/// A raw state change reported by a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    Key { code: u16, value: i32 },
    Abs { code: u16, value: i32 },
}

/// Host-owned handle of one connected device
///
/// Events are only delivered while the stream is open.
pub trait SourceConnection: Send {
    fn open(&mut self) -> Result<(), HostError>;
    fn close(&mut self);
}

/// Callbacks the host invokes; implemented once by the engine
pub trait InputHandler: Send + Sync {
    /// Whether the device should be offered to the core at all
    fn matches(&self, device: &DeviceDescriptor) -> bool;

    /// Registers a newly seen device and returns its fingerprint,
    /// or `None` when the core refuses it
    fn connect(
        &self,
        device: &DeviceDescriptor,
        connection: Box<dyn SourceConnection>,
    ) -> Option<Fingerprint>;

    fn disconnect(&self, source: Fingerprint);

    /// Fast path: must not block and must not rebuild the logical device
    fn event(&self, source: Fingerprint, event: RawEvent);
}
