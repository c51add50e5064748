//! Registry of every physical source the merger knows about
//!
//! Only state and connection handling live here. Mapping-slot consequences of
//! a transition (clean, relink, refresh) are applied by the engine from the
//! outcome each transition returns.

use super::{DeviceDescriptor, Fingerprint, Source, SourceState};
use crate::host::SourceConnection;
use tracing::{debug, info, warn};

/// Outcome of a host connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connected {
    /// First contact; the source is Online
    Created(Fingerprint),
    /// A Disconnected source came back and is Merged again
    Reconnected(Fingerprint),
    /// Fingerprint 0, a live duplicate, or the stream could not be reopened
    Refused,
}

/// Outcome of a host disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnected {
    /// Merged source kept for relinking
    Suspended,
    /// Online source dropped outright
    Removed,
    /// Unknown or already disconnected
    Ignored,
}

/// Outcome of an `unmerge` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmerged {
    /// Merged source is Online again
    Demoted,
    /// Disconnected source dropped for good
    Removed,
    Ignored,
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: Fingerprint) -> Option<&Source> {
        self.sources.iter().find(|source| source.id == id)
    }

    fn find_mut(&mut self, id: Fingerprint) -> Option<&mut Source> {
        self.sources.iter_mut().find(|source| source.id == id)
    }

    /// Sources in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether `id` is Merged and may own mapping slots
    pub fn is_merged(&self, id: Fingerprint) -> bool {
        self.find(id)
            .is_some_and(|source| source.state == SourceState::Merged)
    }

    pub fn source_mut(&mut self, id: Fingerprint) -> Option<&mut Source> {
        self.find_mut(id)
    }

    /// Host connect: creates a new source or revives a Disconnected one
    pub fn connect(
        &mut self,
        descriptor: &DeviceDescriptor,
        mut connection: Box<dyn SourceConnection>,
    ) -> Connected {
        let id = descriptor.fingerprint();
        if id.is_none() {
            debug!("Ignoring device '{}' without fingerprint", descriptor.name);
            return Connected::Refused;
        }

        let Some(source) = self.find_mut(id) else {
            let source = Source::create(descriptor, connection);
            info!(
                "Source {} '{}' online ({} axes, {} buttons)",
                id,
                source.name,
                source.axes.len(),
                source.buttons.len()
            );
            self.sources.push(source);
            return Connected::Created(id);
        };

        if source.state != SourceState::Disconnected {
            warn!(
                "Source {} is already {}; refusing second device '{}'",
                id, source.state, descriptor.name
            );
            return Connected::Refused;
        }

        if let Err(e) = connection.open() {
            warn!("Failed to reopen source {}: {}", id, e);
            return Connected::Refused;
        }

        source.connection = Some(connection);
        source.reseed(descriptor);
        source.set_state(SourceState::Merged);
        info!("Source {} '{}' reconnected", id, source.name);

        Connected::Reconnected(id)
    }

    /// Host disconnect
    pub fn disconnect(&mut self, id: Fingerprint) -> Disconnected {
        let Some(index) = self.sources.iter().position(|source| source.id == id) else {
            debug!("Disconnect of unknown source {}", id);
            return Disconnected::Ignored;
        };

        let source = &mut self.sources[index];
        let state = source.state;
        match state {
            SourceState::Online => {
                if let Some(mut connection) = source.connection.take() {
                    connection.close();
                }
                let source = self.sources.remove(index);
                info!("Source {} '{}' removed", id, source.name);
                Disconnected::Removed
            }
            SourceState::Merged => {
                if let Some(mut connection) = source.connection.take() {
                    connection.close();
                }
                source.set_state(SourceState::Disconnected);
                info!("Source {} '{}' disconnected, mappings kept", id, source.name);
                Disconnected::Suspended
            }
            SourceState::Disconnected => Disconnected::Ignored,
        }
    }

    /// `Online -> Merged`; opens the event stream
    pub fn merge(&mut self, id: Fingerprint) -> bool {
        let Some(source) = self.find_mut(id) else {
            debug!("merge: no source {}", id);
            return false;
        };

        if source.state != SourceState::Online {
            debug!("merge: source {} is {}", id, source.state);
            return false;
        }

        if let Some(connection) = source.connection.as_mut() {
            if let Err(e) = connection.open() {
                warn!("Failed to open source {}: {}", id, e);
                return false;
            }
        }

        source.set_state(SourceState::Merged);
        info!("Source {} '{}' merged", id, source.name);
        true
    }

    /// `Merged -> Online` or `Disconnected -> removed`
    pub fn unmerge(&mut self, id: Fingerprint) -> Unmerged {
        let Some(index) = self.sources.iter().position(|source| source.id == id) else {
            debug!("unmerge: no source {}", id);
            return Unmerged::Ignored;
        };

        let source = &mut self.sources[index];
        let state = source.state;
        match state {
            SourceState::Merged => {
                if let Some(connection) = source.connection.as_mut() {
                    connection.close();
                }
                source.set_state(SourceState::Online);
                info!("Source {} '{}' unmerged", id, source.name);
                Unmerged::Demoted
            }
            SourceState::Disconnected => {
                let source = self.sources.remove(index);
                info!("Source {} '{}' forgotten", id, source.name);
                Unmerged::Removed
            }
            SourceState::Online => {
                debug!("unmerge: source {} is not merged", id);
                Unmerged::Ignored
            }
        }
    }

    /// Closes and drops every source
    pub fn clear(&mut self) {
        for source in self.sources.iter_mut() {
            if let Some(mut connection) = source.connection.take() {
                connection.close();
            }
        }
        self.sources.clear();
    }
}
