use crate::mapping::ChannelKind;
use crate::source::Fingerprint;
use tracing::debug;

/// Routing entry for one destination channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingSlot {
    /// Owning source; `None` marks the slot empty
    pub source_id: Option<Fingerprint>,
    /// Ordinal of the source capability feeding this channel
    pub source_ordinal: usize,
    /// Whether the source is currently connected; cache only, never ownership
    pub resolved: bool,
}

impl MappingSlot {
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none()
    }

    fn references(&self, source: Fingerprint) -> bool {
        self.source_id == Some(source)
    }

    fn clear(&mut self) {
        *self = MappingSlot::default();
    }
}

/// Fixed-capacity channel table for one [`ChannelKind`]
///
/// `total` is one past the highest occupied slot. Interior gaps are kept, so
/// slots 0, 1 and 4 occupied give a total of 5.
#[derive(Debug, Clone)]
pub struct MappingTable {
    kind: ChannelKind,
    slots: Vec<MappingSlot>,
    total: usize,
}

impl MappingTable {
    pub fn new(kind: ChannelKind, capacity: usize) -> Self {
        Self {
            kind,
            slots: vec![MappingSlot::default(); capacity],
            total: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns the slot at `dst` if it is occupied
    pub fn find(&self, dst: usize) -> Option<&MappingSlot> {
        self.slots[..self.total]
            .get(dst)
            .filter(|slot| !slot.is_empty())
    }

    /// Writes `(source, ordinal)` into a slot and returns the channel used
    ///
    /// Without `dst` the lowest empty slot below `total` is reused, otherwise
    /// the table is appended to. Returns `None` when no slot is available.
    pub fn assign(
        &mut self,
        source: Fingerprint,
        ordinal: usize,
        dst: Option<usize>,
    ) -> Option<usize> {
        let dst = match dst {
            Some(dst) => dst,
            None => self.slots[..self.total]
                .iter()
                .position(MappingSlot::is_empty)
                .unwrap_or(self.total),
        };

        if dst >= self.capacity() {
            debug!(
                "No {} slot available for {} (capacity {})",
                self.kind,
                dst,
                self.capacity()
            );
            return None;
        }

        self.slots[dst] = MappingSlot {
            source_id: Some(source),
            source_ordinal: ordinal,
            resolved: true,
        };
        self.total = self.total.max(dst + 1);

        Some(dst)
    }

    /// Empties the slot at `dst`; `false` if it was out of range or already empty
    ///
    /// Only removing the highest occupied slot shrinks `total`.
    pub fn remove(&mut self, dst: usize) -> bool {
        if dst >= self.total || self.slots[dst].is_empty() {
            return false;
        }

        self.slots[dst].clear();
        if dst + 1 == self.total {
            self.trim();
        }

        true
    }

    /// Unresolves every slot of `source`, and empties them too when `forever`
    ///
    /// Returns whether `total` changed.
    pub fn clean(&mut self, source: Fingerprint, forever: bool) -> bool {
        let before = self.total;

        for slot in self.slots[..self.total]
            .iter_mut()
            .filter(|slot| slot.references(source))
        {
            if forever {
                slot.clear();
            } else {
                slot.resolved = false;
            }
        }
        self.trim();

        before != self.total
    }

    /// Resolves every slot of `source` again; returns how many
    pub fn relink(&mut self, source: Fingerprint) -> usize {
        let mut relinked = 0;
        for slot in self.slots[..self.total]
            .iter_mut()
            .filter(|slot| slot.references(source))
        {
            slot.resolved = true;
            relinked += 1;
        }
        relinked
    }

    /// Channels fed by `ordinal` of a connected `source`
    pub fn targets(&self, source: Fingerprint, ordinal: usize) -> impl Iterator<Item = usize> + '_ {
        self.slots[..self.total]
            .iter()
            .enumerate()
            .filter(move |(_, slot)| {
                slot.resolved && slot.references(source) && slot.source_ordinal == ordinal
            })
            .map(|(channel, _)| channel)
    }

    /// Occupied slots with their channel number, in channel order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &MappingSlot)> + '_ {
        self.slots[..self.total]
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
    }

    fn trim(&mut self) {
        while self.total > 0 && self.slots[self.total - 1].is_empty() {
            self.total -= 1;
        }
    }
}
