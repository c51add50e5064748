//! Control channel: textual commands in, status listing out

pub mod protocol;
pub mod socket;
pub mod status;

pub use protocol::{Command, ControlProtocol, ParseError};
pub use socket::ControlServer;
pub use status::{ChannelStatus, SourceStatus, StatusReport};
