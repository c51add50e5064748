//! Bounded hand-off between event callbacks and the output worker
//!
//! Producers never wait: when the buffer is full the new entry is dropped and
//! counted. A single consumer drains entries in FIFO order.

use crate::mapping::ChannelKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Work item for the output worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntry {
    EmitAxis { channel: usize, value: i32 },
    EmitButton { channel: usize, value: i32 },
    /// Rebuild the logical device with the current shape
    Refresh,
}

impl QueueEntry {
    pub fn emit(kind: ChannelKind, channel: usize, value: i32) -> Self {
        match kind {
            ChannelKind::Axis => QueueEntry::EmitAxis { channel, value },
            ChannelKind::Button => QueueEntry::EmitButton { channel, value },
        }
    }
}

/// Creates a queue holding at most `capacity` pending entries
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        QueueProducer {
            sender,
            dropped: dropped.clone(),
        },
        QueueConsumer { receiver, dropped },
    )
}

#[derive(Debug, Clone)]
pub struct QueueProducer {
    sender: mpsc::Sender<QueueEntry>,
    dropped: Arc<AtomicU64>,
}

impl QueueProducer {
    /// Enqueues without blocking; `false` if the entry was dropped
    pub fn push(&self, entry: QueueEntry) -> bool {
        match self.sender.try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Output queue full, dropping {:?}", entry);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Entries lost to overflow or a stopped consumer
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    receiver: mpsc::Receiver<QueueEntry>,
    dropped: Arc<AtomicU64>,
}

impl QueueConsumer {
    /// Waits for the next entry; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<QueueEntry> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueueEntry> {
        self.receiver.try_recv().ok()
    }

    /// Throws away everything still queued and stops accepting new entries
    pub fn discard_pending(&mut self) -> usize {
        self.receiver.close();
        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
