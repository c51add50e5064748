//! Physical input host on top of evdev
//!
//! Periodically enumerates `/dev/input/event*`, offers every new device to
//! the [`InputHandler`] and runs one reader task per accepted device. A read
//! error means the device is gone and is reported as a disconnect.
//!
//! Devices the handler does not match are skipped until their node goes away.
//! Devices it refuses (a second live copy of a fingerprint) are offered again
//! after the next disconnect, since that may have freed the fingerprint.

use super::{InputHandler, RawEvent, SourceConnection};
use crate::error::HostError;
use crate::source::{AbsAxis, AbsInfo, DeviceDescriptor, Fingerprint, InputId};
use evdev::{Device, EventType, InputEvent};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Streaming gate of one evdev device
///
/// The reader task always runs; events are only forwarded while open.
#[derive(Debug, Clone, Default)]
pub struct EvdevConnection {
    streaming: Arc<AtomicBool>,
}

impl EvdevConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

impl SourceConnection for EvdevConnection {
    fn open(&mut self) -> Result<(), HostError> {
        self.streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.streaming.store(false, Ordering::Release);
    }
}

/// Device nodes shared between the scanner and the reader tasks
#[derive(Debug, Default)]
struct Nodes {
    /// Devices with a running reader task
    attached: HashSet<PathBuf>,
    /// Devices the handler refused, offered again after the next disconnect
    refused: HashSet<PathBuf>,
    /// Bumped by every reader that lets go of its device
    detached: u64,
}

impl Nodes {
    fn is_known(&self, path: &Path) -> bool {
        self.attached.contains(path) || self.refused.contains(path)
    }

    fn detach(&mut self, path: &Path) {
        self.attached.remove(path);
        self.refused.clear();
        self.detached += 1;
    }
}

type SharedNodes = Arc<Mutex<Nodes>>;

fn locked(nodes: &SharedNodes) -> MutexGuard<'_, Nodes> {
    nodes.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct EvdevHost<H: InputHandler + 'static> {
    handler: Arc<H>,
    scan_interval: Duration,
    nodes: SharedNodes,
    /// Devices the handler does not match; forgotten when the node disappears
    ignored: HashSet<PathBuf>,
    shutdown: CancellationToken,
}

impl<H: InputHandler + 'static> EvdevHost<H> {
    pub fn new(handler: Arc<H>, scan_interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            handler,
            scan_interval,
            nodes: SharedNodes::default(),
            ignored: HashSet::new(),
            shutdown,
        }
    }

    fn is_known(&self, path: &Path) -> bool {
        self.ignored.contains(path) || locked(&self.nodes).is_known(path)
    }

    /// Offers every device not seen yet; returns how many were attached
    pub fn scan(&mut self) -> usize {
        let mut present = HashSet::new();
        let mut attached = 0;

        for (path, device) in evdev::enumerate() {
            if !is_event_node(&path) {
                continue;
            }
            present.insert(path.clone());
            if self.is_known(&path) {
                continue;
            }

            let descriptor = describe(&device);
            let connection = EvdevConnection::new();
            let Some(id) = self.offer(&path, &descriptor, &connection) else {
                continue;
            };

            info!("Attached {} '{}' as {}", path.display(), descriptor.name, id);
            tokio::spawn(read_events(
                path,
                device,
                id,
                self.handler.clone(),
                connection,
                self.nodes.clone(),
                self.shutdown.clone(),
            ));
            attached += 1;
        }

        self.ignored.retain(|path| present.contains(path));
        locked(&self.nodes)
            .refused
            .retain(|path| present.contains(path));
        attached
    }

    /// Hands one device to the handler and records the outcome for `path`
    fn offer(
        &mut self,
        path: &Path,
        descriptor: &DeviceDescriptor,
        connection: &EvdevConnection,
    ) -> Option<Fingerprint> {
        if !self.handler.matches(descriptor) {
            debug!("Skipping {} '{}'", path.display(), descriptor.name);
            self.ignored.insert(path.to_path_buf());
            return None;
        }

        let detached = locked(&self.nodes).detached;
        let connected = self
            .handler
            .connect(descriptor, Box::new(connection.clone()));

        let mut nodes = locked(&self.nodes);
        match connected {
            Some(id) => {
                nodes.attached.insert(path.to_path_buf());
                Some(id)
            }
            // a reader let go meanwhile; try again on the next scan
            None if nodes.detached != detached => None,
            None => {
                debug!("{} refused until the next disconnect", path.display());
                nodes.refused.insert(path.to_path_buf());
                None
            }
        }
    }

    pub async fn run_until_shutdown(mut self) {
        info!(
            "Scanning for input devices every {}ms",
            self.scan_interval.as_millis()
        );
        let mut interval = tokio::time::interval(self.scan_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Input host shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let attached = self.scan();
                    if attached > 0 {
                        debug!("Scan attached {} devices", attached);
                    }
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_until_shutdown())
    }
}

/// Reads one device until it disappears or the host shuts down
async fn read_events<H: InputHandler>(
    path: PathBuf,
    device: Device,
    id: Fingerprint,
    handler: Arc<H>,
    connection: EvdevConnection,
    nodes: SharedNodes,
    shutdown: CancellationToken,
) {
    let mut stream = match device.into_event_stream() {
        Ok(stream) => stream,
        Err(source) => {
            warn!("{}", HostError::Read { path: path.clone(), source });
            handler.disconnect(id);
            locked(&nodes).detach(&path);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next_event() => match event {
                Ok(event) => {
                    if !connection.is_streaming() {
                        continue;
                    }
                    if let Some(raw) = raw_event(&event) {
                        handler.event(id, raw);
                    }
                }
                Err(source) => {
                    info!("{}", HostError::Read { path: path.clone(), source });
                    handler.disconnect(id);
                    break;
                }
            }
        }
    }

    locked(&nodes).detach(&path);
    debug!("Reader for {} finished", path.display());
}

/// Builds the host-neutral descriptor of an evdev device
pub fn describe(device: &Device) -> DeviceDescriptor {
    let id = device.input_id();
    let abs_state = device.get_abs_state().ok();

    let axes = device
        .supported_absolute_axes()
        .map(|axes| {
            axes.iter()
                .map(|axis| {
                    let info = abs_state
                        .as_ref()
                        .and_then(|state| state.get(usize::from(axis.0)))
                        .map(|abs| AbsInfo {
                            value: abs.value,
                            minimum: abs.minimum,
                            maximum: abs.maximum,
                            fuzz: abs.fuzz,
                            flat: abs.flat,
                            resolution: abs.resolution,
                        })
                        .unwrap_or_default();
                    AbsAxis { code: axis.0, info }
                })
                .collect()
        })
        .unwrap_or_default();

    let keys = device
        .supported_keys()
        .map(|keys| keys.iter().map(|key| key.code()).collect())
        .unwrap_or_default();

    let pressed = device
        .get_key_state()
        .map(|keys| keys.iter().map(|key| key.code()).collect())
        .unwrap_or_default();

    DeviceDescriptor {
        name: device.name().unwrap_or_default().to_string(),
        id: InputId::new(id.bus_type().0, id.vendor(), id.product(), id.version()),
        axes,
        keys,
        pressed,
    }
}

fn raw_event(event: &InputEvent) -> Option<RawEvent> {
    match event.event_type() {
        EventType::KEY => Some(RawEvent::Key {
            code: event.code(),
            value: event.value(),
        }),
        EventType::ABSOLUTE => Some(RawEvent::Abs {
            code: event.code(),
            value: event.value(),
        }),
        _ => None,
    }
}

/// Whether `path` looks like an evdev node
pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("event"))
}
