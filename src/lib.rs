//! unijoy merges several physical joysticks into one virtual joystick.
//!
//! Any axis or button of any connected source can be routed to any channel of
//! the merged device, and the routing can be edited live through a small
//! textual control protocol while devices come and go.
//!
//! ```text
//! EvdevHost ──► Engine (SourceRegistry + MappingTables) ──► queue ──► Worker ──► VirtualJoystick
//!                  ▲
//! ControlServer ───┘ merge / unmerge / add_* / del_*
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod host;
pub mod mapping;
pub mod output;
pub mod source;

pub use engine::{Engine, EngineSettings};
