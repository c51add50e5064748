//! The merger engine
//!
//! Owns the source registry and both mapping tables behind one coarse lock,
//! and the producer side of the output queue. Every operation that changes
//! the logical device's shape only enqueues a [`QueueEntry::Refresh`]; the
//! output worker does the actual re-registration.
//!
//! # Contexts
//!
//! ```text
//! host reader tasks ──event()──────┐
//! host scanner ──connect/disconnect┼──► Engine ──[QueueEntry]──► Worker ──► LogicalDevice
//! control socket ──merge/add/...───┘   (Mutex)   (bounded, FIFO)
//! ```
//!
//! `event()` never waits on anything but the topology lock, and the lock is
//! never held across an await point or a device registration.

use crate::control::status::{ChannelStatus, SourceStatus, StatusReport};
use crate::error::EngineError;
use crate::host::{InputHandler, RawEvent, SourceConnection};
use crate::mapping::{ChannelKind, MappingSlot, MappingTable, MAX_AXES, MAX_BUTTONS};
use crate::output::{ChannelValue, DeviceShape, DeviceSnapshot, QueueEntry, QueueProducer};
use crate::source::descriptor::BTN_MISC;
use crate::source::{
    Connected, DeviceDescriptor, Disconnected, Fingerprint, SourceRegistry, Unmerged,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Default name of the logical device
pub const DEVICE_NAME: &str = "unijoy v0.3";

/// Static parameters of an engine instance
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Name the logical device is registered under
    pub device_name: String,
    /// Axis channel capacity, at most [`MAX_AXES`]
    pub max_axes: usize,
    /// Button channel capacity, at most [`MAX_BUTTONS`]
    pub max_buttons: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            max_axes: MAX_AXES,
            max_buttons: MAX_BUTTONS,
        }
    }
}

/// Everything guarded by the topology lock
struct Topology {
    registry: SourceRegistry,
    axes: MappingTable,
    buttons: MappingTable,
}

impl Topology {
    fn table(&self, kind: ChannelKind) -> &MappingTable {
        match kind {
            ChannelKind::Axis => &self.axes,
            ChannelKind::Button => &self.buttons,
        }
    }

    fn table_mut(&mut self, kind: ChannelKind) -> &mut MappingTable {
        match kind {
            ChannelKind::Axis => &mut self.axes,
            ChannelKind::Button => &mut self.buttons,
        }
    }

    /// Clears slots of `source` in both tables; true if a total changed
    fn clean(&mut self, source: Fingerprint, forever: bool) -> bool {
        let axes = self.axes.clean(source, forever);
        let buttons = self.buttons.clean(source, forever);
        axes || buttons
    }

    fn current_value(&self, kind: ChannelKind, channel: usize) -> i32 {
        self.table(kind)
            .find(channel)
            .filter(|slot| slot.resolved)
            .and_then(|slot| {
                let source = self.registry.find(slot.source_id?)?;
                Some(source.value(kind, slot.source_ordinal))
            })
            .unwrap_or(0)
    }
}

pub struct Engine {
    settings: EngineSettings,
    topology: Mutex<Topology>,
    queue: QueueProducer,
}

impl Engine {
    /// Creates an engine that feeds `queue`
    ///
    /// Capacities above the platform limits are clamped.
    pub fn new(settings: EngineSettings, queue: QueueProducer) -> Self {
        let max_axes = settings.max_axes.min(ChannelKind::Axis.limit());
        let max_buttons = settings.max_buttons.min(ChannelKind::Button.limit());
        info!(
            "Creating engine '{}' ({} axes, {} buttons max)",
            settings.device_name, max_axes, max_buttons
        );

        Self {
            topology: Mutex::new(Topology {
                registry: SourceRegistry::new(),
                axes: MappingTable::new(ChannelKind::Axis, max_axes),
                buttons: MappingTable::new(ChannelKind::Button, max_buttons),
            }),
            settings,
            queue,
        }
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self) {
        if !self.queue.push(QueueEntry::Refresh) {
            warn!("Output queue full, refresh dropped");
        }
    }

    /// `merge <id>`: makes an Online source eligible for mappings
    pub fn merge(&self, id: Fingerprint) -> bool {
        self.topology().registry.merge(id)
    }

    /// `unmerge <id>`: releases every slot of the source
    pub fn unmerge(&self, id: Fingerprint) -> bool {
        let mut topology = self.topology();
        match topology.registry.unmerge(id) {
            Unmerged::Demoted | Unmerged::Removed => {
                topology.clean(id, true);
                self.refresh();
                true
            }
            Unmerged::Ignored => false,
        }
    }

    /// `add_axis` / `add_button`: routes ordinal `src` of `id` to a channel
    ///
    /// Without `dst` the lowest free channel is used. Returns the channel
    /// written, or `None` when the command was a no-op.
    pub fn add(
        &self,
        kind: ChannelKind,
        id: Fingerprint,
        src: usize,
        dst: Option<usize>,
    ) -> Option<usize> {
        let mut topology = self.topology();

        let Some(source) = topology.registry.find(id) else {
            debug!("add_{}: no source {}", kind, id);
            return None;
        };
        if !topology.registry.is_merged(id) {
            debug!("add_{}: source {} is {}", kind, id, source.state());
            return None;
        }
        let count = source.count(kind);
        if src >= count {
            debug!("add_{}: source {} has {} {}s, got {}", kind, id, count, kind, src);
            return None;
        }

        let channel = topology.table_mut(kind).assign(id, src, dst)?;
        info!("{} {} <- {} of {}", kind, channel, src, id);
        self.refresh();

        Some(channel)
    }

    /// `del_axis` / `del_button`
    pub fn remove(&self, kind: ChannelKind, dst: usize) -> bool {
        let mut topology = self.topology();
        if !topology.table_mut(kind).remove(dst) {
            debug!("del_{}: channel {} is not mapped", kind, dst);
            return false;
        }

        info!("{} {} unmapped", kind, dst);
        self.refresh();
        true
    }

    pub fn find(&self, kind: ChannelKind, dst: usize) -> Option<MappingSlot> {
        self.topology().table(kind).find(dst).copied()
    }

    /// One past the highest mapped channel of `kind`
    pub fn total(&self, kind: ChannelKind) -> usize {
        self.topology().table(kind).total()
    }

    /// Last value of whatever feeds `channel`, 0 for an empty or unresolved channel
    pub fn current_value(&self, kind: ChannelKind, channel: usize) -> i32 {
        self.topology().current_value(kind, channel)
    }

    /// Shape the logical device should have, with the startup burst for it
    ///
    /// The burst holds the current value of every channel below the totals,
    /// axes first. Both come from the same lock so they always agree.
    pub fn snapshot(&self) -> DeviceSnapshot {
        let guard = self.topology();
        let topology: &Topology = &guard;

        let shape = DeviceShape {
            name: self.settings.device_name.clone(),
            axis_total: topology.axes.total(),
            button_total: topology.buttons.total(),
        };
        let burst = ChannelKind::ALL
            .iter()
            .flat_map(|&kind| {
                (0..topology.table(kind).total()).map(move |channel| ChannelValue {
                    kind,
                    channel,
                    value: topology.current_value(kind, channel),
                })
            })
            .collect();

        DeviceSnapshot { shape, burst }
    }

    /// Entries lost to a full output queue
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn status(&self) -> StatusReport {
        let topology = self.topology();

        let sources = topology
            .registry
            .iter()
            .map(|source| SourceStatus {
                id: source.id(),
                name: source.name().to_string(),
                state: source.state(),
                axes: source.count(ChannelKind::Axis),
                buttons: source.count(ChannelKind::Button),
                since: source.since(),
            })
            .collect();

        let channels = |kind: ChannelKind| -> Vec<ChannelStatus> {
            topology
                .table(kind)
                .occupied()
                .filter_map(|(channel, slot)| {
                    Some(ChannelStatus {
                        kind,
                        channel,
                        source: slot.source_id?,
                        ordinal: slot.source_ordinal,
                        resolved: slot.resolved,
                    })
                })
                .collect()
        };

        StatusReport {
            device_name: self.settings.device_name.clone(),
            sources,
            buttons: channels(ChannelKind::Button),
            axes: channels(ChannelKind::Axis),
            axis_total: topology.axes.total(),
            button_total: topology.buttons.total(),
            dropped: self.queue.dropped(),
        }
    }

    /// Legacy per-axis calibration entry point
    ///
    /// Corrections are derived from the device's own calibration when a
    /// source is created and cannot be overridden.
    pub fn set_correction(
        &self,
        id: Fingerprint,
        axis: usize,
        _coefficients: &[i32],
    ) -> Result<(), EngineError> {
        debug!("Calibration request for axis {} of {} refused", axis, id);
        Err(EngineError::NotSupported("axis calibration".into()))
    }

    /// Forgets every source and mapping
    pub fn teardown(&self) {
        let mut topology = self.topology();
        let capacity = (topology.axes.capacity(), topology.buttons.capacity());
        topology.registry.clear();
        topology.axes = MappingTable::new(ChannelKind::Axis, capacity.0);
        topology.buttons = MappingTable::new(ChannelKind::Button, capacity.1);
        info!("Engine torn down");
    }
}

impl InputHandler for Engine {
    fn matches(&self, device: &DeviceDescriptor) -> bool {
        if device.name == self.settings.device_name {
            return false;
        }
        if device.fingerprint().is_none() {
            debug!("Skipping '{}': no usable input id", device.name);
            return false;
        }
        device.is_joystick_like()
    }

    fn connect(
        &self,
        device: &DeviceDescriptor,
        connection: Box<dyn SourceConnection>,
    ) -> Option<Fingerprint> {
        let mut topology = self.topology();
        match topology.registry.connect(device, connection) {
            Connected::Created(id) => Some(id),
            Connected::Reconnected(id) => {
                let topology = &mut *topology;
                for kind in ChannelKind::ALL {
                    let relinked = topology.table_mut(kind).relink(id);
                    debug!("Relinked {} {} channels of {}", relinked, kind, id);
                }

                // push the replugged device's state into the live channels
                for kind in ChannelKind::ALL {
                    let table = topology.table(kind);
                    for (channel, slot) in table.occupied() {
                        if slot.source_id == Some(id) {
                            let value = topology.current_value(kind, channel);
                            self.queue.push(QueueEntry::emit(kind, channel, value));
                        }
                    }
                }
                Some(id)
            }
            Connected::Refused => None,
        }
    }

    fn disconnect(&self, source: Fingerprint) {
        let mut topology = self.topology();
        if topology.registry.disconnect(source) == Disconnected::Suspended
            && topology.clean(source, false)
        {
            self.refresh();
        }
    }

    fn event(&self, source: Fingerprint, event: RawEvent) {
        let (kind, code, raw) = match event {
            // auto-repeat and keyboard keys never reach the logical device
            RawEvent::Key { value: 2, .. } => return,
            RawEvent::Key { code, .. } if code < BTN_MISC => return,
            RawEvent::Key { code, value } => (ChannelKind::Button, code, value),
            RawEvent::Abs { code, value } => (ChannelKind::Axis, code, value),
        };

        let mut topology = self.topology();
        if !topology.registry.is_merged(source) {
            return;
        }

        let topology = &mut *topology;
        let Some((ordinal, value)) = topology
            .registry
            .source_mut(source)
            .and_then(|s| s.record(kind, code, raw))
        else {
            return;
        };

        for channel in topology.table(kind).targets(source, ordinal) {
            self.queue.push(QueueEntry::emit(kind, channel, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{bounded, QueueConsumer};
    use crate::source::descriptor::BTN_JOYSTICK;
    use crate::source::tests::{stick, NullConnection};
    use crate::source::{SourceState, AXIS_MAX};

    const A: Fingerprint = Fingerprint(111);
    const B: Fingerprint = Fingerprint(222);

    fn engine() -> (Engine, QueueConsumer) {
        let (producer, consumer) = bounded(64);
        (Engine::new(EngineSettings::default(), producer), consumer)
    }

    fn drain(consumer: &mut QueueConsumer) -> Vec<QueueEntry> {
        std::iter::from_fn(|| consumer.try_recv()).collect()
    }

    fn plug(engine: &Engine, version: u16, axes: u16, buttons: u16) -> Option<Fingerprint> {
        engine.connect(&stick(version, axes, buttons), Box::new(NullConnection))
    }

    #[test]
    fn add_requires_merged_source() {
        let (engine, mut queue) = engine();
        plug(&engine, 111, 4, 19);

        assert_eq!(engine.add(ChannelKind::Axis, A, 0, None), None);
        assert!(drain(&mut queue).is_empty());

        engine.merge(A);
        assert_eq!(engine.add(ChannelKind::Axis, A, 0, None), Some(0));
        assert_eq!(drain(&mut queue), vec![QueueEntry::Refresh]);
    }

    #[test]
    fn add_rejects_out_of_range_ordinal() {
        let (engine, _queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        assert_eq!(engine.add(ChannelKind::Axis, A, 4, Some(0)), None);
        assert_eq!(engine.add(ChannelKind::Button, A, 19, None), None);
        assert_eq!(engine.add(ChannelKind::Button, A, 18, None), Some(0));
        assert_eq!(engine.add(ChannelKind::Axis, A, 0, Some(MAX_AXES)), None);
    }

    #[test]
    fn events_fan_out_to_mapped_channels() {
        let (engine, mut queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        engine.add(ChannelKind::Axis, A, 1, Some(0));
        engine.add(ChannelKind::Axis, A, 1, Some(2));
        engine.add(ChannelKind::Button, A, 0, Some(5));
        drain(&mut queue);

        engine.event(A, RawEvent::Abs { code: 1, value: 1022 });
        engine.event(A, RawEvent::Key { code: BTN_JOYSTICK, value: 1 });
        engine.event(A, RawEvent::Key { code: BTN_JOYSTICK, value: 2 });
        engine.event(A, RawEvent::Key { code: 30, value: 1 });
        engine.event(A, RawEvent::Abs { code: 3, value: 0 });

        assert_eq!(
            drain(&mut queue),
            vec![
                QueueEntry::EmitAxis { channel: 0, value: AXIS_MAX },
                QueueEntry::EmitAxis { channel: 2, value: AXIS_MAX },
                QueueEntry::EmitButton { channel: 5, value: 1 },
            ]
        );
        assert_eq!(engine.current_value(ChannelKind::Axis, 2), AXIS_MAX);
        assert_eq!(engine.current_value(ChannelKind::Axis, 1), 0);
    }

    #[test]
    fn unmerged_source_events_are_ignored() {
        let (engine, mut queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.event(A, RawEvent::Abs { code: 0, value: 1022 });
        assert!(drain(&mut queue).is_empty());
    }

    #[test]
    fn unmerge_reclaims_slots() {
        let (engine, mut queue) = engine();
        plug(&engine, 111, 4, 19);
        plug(&engine, 222, 7, 32);
        engine.merge(A);
        engine.merge(B);
        engine.add(ChannelKind::Axis, A, 0, Some(0));
        engine.add(ChannelKind::Axis, B, 2, Some(3));
        drain(&mut queue);

        assert!(engine.unmerge(B));
        assert_eq!(engine.total(ChannelKind::Axis), 1);
        assert_eq!(drain(&mut queue), vec![QueueEntry::Refresh]);
        assert!(!engine.unmerge(B));
    }

    #[test]
    fn replug_relinks_and_replays_values() {
        let (engine, mut queue) = engine();
        plug(&engine, 222, 7, 32);
        engine.merge(B);
        engine.add(ChannelKind::Button, B, 3, Some(1));
        drain(&mut queue);

        engine.disconnect(B);
        let slot = engine.find(ChannelKind::Button, 1).unwrap();
        assert!(!slot.resolved);
        assert!(drain(&mut queue).is_empty());

        let mut replugged = stick(222, 7, 32);
        replugged.pressed = vec![BTN_JOYSTICK + 3];
        assert_eq!(
            engine.connect(&replugged, Box::new(NullConnection)),
            Some(B)
        );
        assert!(engine.find(ChannelKind::Button, 1).unwrap().resolved);
        assert_eq!(
            drain(&mut queue),
            vec![QueueEntry::EmitButton { channel: 1, value: 1 }]
        );
    }

    #[test]
    fn logical_device_is_never_matched() {
        let (engine, _queue) = engine();
        let mut own = stick(7, 2, 2);
        own.name = DEVICE_NAME.into();
        assert!(!engine.matches(&own));
        assert!(engine.matches(&stick(7, 2, 2)));
        assert!(!engine.matches(&stick(0, 2, 2)));
    }

    #[test]
    fn startup_burst_covers_every_channel_below_totals() {
        let (engine, _queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        engine.add(ChannelKind::Axis, A, 0, Some(1));
        engine.add(ChannelKind::Button, A, 0, Some(0));
        engine.event(A, RawEvent::Key { code: BTN_JOYSTICK, value: 1 });

        let snapshot = engine.snapshot();
        assert_eq!((snapshot.shape.axis_total, snapshot.shape.button_total), (2, 1));
        let summary: Vec<(ChannelKind, usize, i32)> = snapshot
            .burst
            .iter()
            .map(|v| (v.kind, v.channel, v.value))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChannelKind::Axis, 0, 0),
                (ChannelKind::Axis, 1, 0),
                (ChannelKind::Button, 0, 1),
            ]
        );
    }

    #[test]
    fn snapshot_burst_never_exceeds_shape() {
        let (engine, _queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        for dst in [0, 3, 9] {
            engine.add(ChannelKind::Button, A, 1, Some(dst));
            let snapshot = engine.snapshot();
            let buttons = snapshot
                .burst
                .iter()
                .filter(|v| v.kind == ChannelKind::Button)
                .count();
            assert_eq!(buttons, snapshot.shape.button_total);
            assert_eq!(snapshot.shape.button_total, dst + 1);
        }
    }

    #[test]
    fn capacities_are_clamped_to_platform_limits() {
        let (producer, _consumer) = bounded(8);
        let settings = EngineSettings {
            max_axes: 1000,
            ..Default::default()
        };
        let engine = Engine::new(settings, producer);
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        assert_eq!(engine.add(ChannelKind::Axis, A, 0, Some(MAX_AXES - 1)), Some(MAX_AXES - 1));
        assert_eq!(engine.add(ChannelKind::Axis, A, 0, Some(MAX_AXES)), None);
    }

    #[test]
    fn calibration_is_not_supported() {
        let (engine, _queue) = engine();
        assert!(matches!(
            engine.set_correction(A, 0, &[1, 2, 3]),
            Err(EngineError::NotSupported(_))
        ));
    }

    #[test]
    fn teardown_forgets_everything() {
        let (engine, _queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        engine.add(ChannelKind::Axis, A, 0, None);
        engine.teardown();
        assert_eq!(engine.total(ChannelKind::Axis), 0);
        assert!(engine.status().sources.is_empty());
        assert!(!engine.merge(A));
    }

    #[test]
    fn status_lists_sources_and_channels() {
        let (engine, _queue) = engine();
        plug(&engine, 111, 4, 19);
        engine.merge(A);
        engine.add(ChannelKind::Axis, A, 2, Some(3));

        let status = engine.status();
        assert_eq!(status.sources.len(), 1);
        assert_eq!(status.sources[0].state, SourceState::Merged);
        assert_eq!(status.axes.len(), 1);
        assert_eq!(status.axes[0].channel, 3);
        assert_eq!(status.axes[0].ordinal, 2);
        assert_eq!(status.axis_total, 4);
    }
}
