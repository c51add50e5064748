//! Output worker with statum state machine
//!
//! The only task that touches the [`LogicalDevice`]. It drains the output
//! queue in FIFO order, so a refresh is handled only after every emission
//! queued against the previous shape. Device calls block (uinput writes and
//! device creation), so the worker runs on its own blocking-pool thread.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──► Running ──shutdown / queue closed──► Stopped
//! ```

use super::{DeviceSnapshot, LogicalDevice, QueueConsumer, QueueEntry};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::mapping::ChannelKind;
use statum::{machine, state};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters collected while the worker runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub emitted: u64,
    pub failed_emits: u64,
    pub refreshes: u64,
    pub failed_refreshes: u64,
    /// Entries still queued at shutdown
    pub discarded: usize,
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

#[machine]
pub struct Worker<S: WorkerState> {
    engine: Arc<Engine>,
    consumer: QueueConsumer,
    device: Box<dyn LogicalDevice>,
    shutdown: CancellationToken,
    report: WorkerReport,
}

impl<S: WorkerState> Worker<S> {
    pub fn report(&self) -> &WorkerReport {
        &self.report
    }
}

impl Worker<Idle> {
    pub fn create(
        engine: Arc<Engine>,
        consumer: QueueConsumer,
        device: Box<dyn LogicalDevice>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::new(engine, consumer, device, shutdown, WorkerReport::default())
    }

    pub fn start(self) -> Worker<Running> {
        info!("Output worker started");
        self.transition()
    }
}

impl Worker<Running> {
    /// Handles one queue entry
    pub fn dispatch(&mut self, entry: QueueEntry) {
        match entry {
            QueueEntry::EmitAxis { channel, value } => self.emit(ChannelKind::Axis, channel, value),
            QueueEntry::EmitButton { channel, value } => {
                self.emit(ChannelKind::Button, channel, value)
            }
            QueueEntry::Refresh => self.refresh(),
        }
    }

    fn emit(&mut self, kind: ChannelKind, channel: usize, value: i32) {
        let result = self
            .device
            .report(kind, channel, value)
            .and_then(|_| self.device.sync());

        match result {
            Ok(()) => self.report.emitted += 1,
            Err(e) => {
                self.report.failed_emits += 1;
                debug!("Dropped {} {} = {}: {}", kind, channel, value, e);
            }
        }
    }

    /// Rebuilds the logical device and replays the current channel values
    fn refresh(&mut self) {
        let DeviceSnapshot { shape, burst } = self.engine.snapshot();
        self.report.refreshes += 1;

        if shape.is_empty() {
            debug!("No channels mapped, unregistering logical device");
            self.device.unregister();
            return;
        }

        if let Err(e) = self.device.register(&shape) {
            self.report.failed_refreshes += 1;
            error!("Device shape change failed, previous device remains: {}", e);
            return;
        }

        for value in &burst {
            if let Err(e) = self.device.report(value.kind, value.channel, value.value) {
                warn!("Failed to replay {} {}: {}", value.kind, value.channel, e);
            }
        }
        if let Err(e) = self.device.sync() {
            warn!("Failed to flush startup burst: {}", e);
        }
        debug!("Replayed {} channel values", burst.len());
    }

    /// Drains the queue until cancelled or every producer is gone
    pub async fn run_until_shutdown(mut self) -> Worker<Stopped> {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received by output worker");
                    break;
                }
                next = self.consumer.recv() => next,
            };

            match next {
                Some(entry) => self.dispatch(entry),
                None => {
                    warn!("Output queue closed");
                    break;
                }
            }
        }

        self.stop()
    }

    /// Discards pending entries and removes the logical device
    pub fn stop(mut self) -> Worker<Stopped> {
        self.report.discarded = self.consumer.discard_pending();
        if self.report.discarded > 0 {
            debug!("Discarded {} pending entries", self.report.discarded);
        }
        self.device.unregister();
        self.transition()
    }
}

impl Worker<Stopped> {
    pub fn into_report(self) -> WorkerReport {
        info!("Output worker stopped: {:?}", self.report);
        self.report
    }
}

/// Handle for the output worker running on a dedicated blocking thread
pub struct WorkerHandle {
    task_handle: Option<JoinHandle<WorkerReport>>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    pub fn spawn(
        engine: Arc<Engine>,
        consumer: QueueConsumer,
        device: Box<dyn LogicalDevice>,
        shutdown: CancellationToken,
    ) -> Self {
        let worker = Worker::create(engine, consumer, device, shutdown.clone()).start();
        let runtime = Handle::current();
        let task_handle = tokio::task::spawn_blocking(move || {
            runtime.block_on(worker.run_until_shutdown()).into_report()
        });

        Self {
            task_handle: Some(task_handle),
            shutdown,
        }
    }

    /// Signals the worker and waits for it to finish
    pub async fn shutdown(&mut self) -> Result<WorkerReport, EngineError> {
        self.shutdown.cancel();

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Output worker task panicked: {}", e);
                EngineError::WorkerError(format!("Output worker task panicked: {}", e))
            }),
            None => {
                debug!("Output worker already shut down");
                Ok(WorkerReport::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::error::DeviceError;
    use crate::host::{InputHandler, RawEvent};
    use crate::output::{bounded, DeviceShape};
    use crate::source::tests::{stick, NullConnection};
    use crate::source::{Fingerprint, AXIS_MAX};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Register(usize, usize),
        Unregister,
        Report(ChannelKind, usize, i32),
        Sync,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_register: bool,
        /// Thread the last registration ran on
        thread: Arc<Mutex<Option<ThreadId>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LogicalDevice for Recorder {
        fn register(&mut self, shape: &DeviceShape) -> Result<(), DeviceError> {
            if self.fail_register {
                return Err(DeviceError::Create(std::io::Error::other("no uinput")));
            }
            *self.thread.lock().unwrap() = Some(std::thread::current().id());
            self.calls
                .lock()
                .unwrap()
                .push(Call::Register(shape.axis_total, shape.button_total));
            Ok(())
        }

        fn unregister(&mut self) {
            self.calls.lock().unwrap().push(Call::Unregister);
        }

        fn report(&mut self, kind: ChannelKind, channel: usize, value: i32) -> Result<(), DeviceError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Report(kind, channel, value));
            Ok(())
        }

        fn sync(&mut self) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(Call::Sync);
            Ok(())
        }
    }

    const A: Fingerprint = Fingerprint(111);

    fn setup(recorder: &Recorder) -> (Arc<Engine>, Worker<Running>) {
        let (producer, consumer) = bounded(64);
        let engine = Arc::new(Engine::new(EngineSettings::default(), producer));
        let worker = Worker::create(
            engine.clone(),
            consumer,
            Box::new(recorder.clone()),
            CancellationToken::new(),
        )
        .start();
        (engine, worker)
    }

    #[test]
    fn refresh_registers_then_replays_values() {
        let recorder = Recorder::default();
        let (engine, mut worker) = setup(&recorder);
        engine.connect(&stick(111, 4, 19), Box::new(NullConnection));
        engine.merge(A);
        engine.add(ChannelKind::Axis, A, 0, Some(1));
        engine.event(A, RawEvent::Abs { code: 0, value: 1022 });

        worker.dispatch(QueueEntry::Refresh);
        assert_eq!(
            recorder.calls(),
            vec![
                Call::Register(2, 0),
                Call::Report(ChannelKind::Axis, 0, 0),
                Call::Report(ChannelKind::Axis, 1, AXIS_MAX),
                Call::Sync,
            ]
        );
    }

    #[test]
    fn empty_shape_only_unregisters() {
        let recorder = Recorder::default();
        let (_engine, mut worker) = setup(&recorder);
        worker.dispatch(QueueEntry::Refresh);
        assert_eq!(recorder.calls(), vec![Call::Unregister]);
    }

    #[test]
    fn failed_refresh_is_not_fatal() {
        let recorder = Recorder {
            fail_register: true,
            ..Default::default()
        };
        let (engine, mut worker) = setup(&recorder);
        engine.connect(&stick(111, 4, 19), Box::new(NullConnection));
        engine.merge(A);
        engine.add(ChannelKind::Button, A, 0, None);

        worker.dispatch(QueueEntry::Refresh);
        worker.dispatch(QueueEntry::EmitButton { channel: 0, value: 1 });
        assert_eq!(worker.report().failed_refreshes, 1);
        assert_eq!(
            recorder.calls(),
            vec![Call::Report(ChannelKind::Button, 0, 1), Call::Sync]
        );
    }

    #[test]
    fn emit_reports_and_syncs() {
        let recorder = Recorder::default();
        let (_engine, mut worker) = setup(&recorder);
        worker.dispatch(QueueEntry::EmitAxis { channel: 3, value: -5 });
        assert_eq!(
            recorder.calls(),
            vec![Call::Report(ChannelKind::Axis, 3, -5), Call::Sync]
        );
        assert_eq!(worker.report().emitted, 1);
    }

    #[tokio::test]
    async fn spawned_worker_runs_off_the_runtime_thread() {
        let recorder = Recorder::default();
        let (producer, consumer) = bounded(64);
        let engine = Arc::new(Engine::new(EngineSettings::default(), producer));
        let mut handle = WorkerHandle::spawn(
            engine.clone(),
            consumer,
            Box::new(recorder.clone()),
            CancellationToken::new(),
        );

        engine.connect(&stick(111, 4, 19), Box::new(NullConnection));
        engine.merge(A);
        engine.add(ChannelKind::Button, A, 2, Some(0));

        let registered = async {
            while !recorder.calls().contains(&Call::Register(0, 1)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), registered)
            .await
            .unwrap();

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.refreshes, 1);
        let worker_thread = *recorder.thread.lock().unwrap();
        assert!(worker_thread.is_some_and(|id| id != std::thread::current().id()));
        assert_eq!(recorder.calls().last(), Some(&Call::Unregister));
        assert!(handle.shutdown().await.is_ok());
    }
}
