//! Snapshot of the merger for the status listing

use crate::mapping::ChannelKind;
use crate::source::{Fingerprint, SourceState};
use chrono::{DateTime, Local};
use std::fmt;

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub id: Fingerprint,
    pub name: String,
    pub state: SourceState,
    pub axes: usize,
    pub buttons: usize,
    /// Time of the last state transition
    pub since: DateTime<Local>,
}

/// One mapped destination channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub kind: ChannelKind,
    pub channel: usize,
    pub source: Fingerprint,
    pub ordinal: usize,
    pub resolved: bool,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub device_name: String,
    /// Sources in the order they were first seen
    pub sources: Vec<SourceStatus>,
    pub buttons: Vec<ChannelStatus>,
    pub axes: Vec<ChannelStatus>,
    pub axis_total: usize,
    pub button_total: usize,
    /// Output queue entries lost to overflow
    pub dropped: u64,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            ChannelKind::Axis => "AXS",
            ChannelKind::Button => "BTN",
        };
        let link = if self.resolved { "ONLINE" } else { "OFFLINE" };
        write!(
            f,
            "{} #{:>3} -> {:>3} of {} {}",
            tag, self.channel, self.ordinal, self.source, link
        )
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for source in &self.sources {
            writeln!(
                f,
                "{}\t{}\t{:>3}\t{:>3}\t{}\t{}",
                source.id,
                source.state,
                source.axes,
                source.buttons,
                source.since.format("%H:%M:%S"),
                source.name
            )?;
        }

        for channel in self.buttons.iter().chain(&self.axes) {
            writeln!(f, "{}", channel)?;
        }

        writeln!(
            f,
            "{}: {} axes, {} buttons, {} dropped",
            self.device_name, self.axis_total, self.button_total, self.dropped
        )
    }
}
