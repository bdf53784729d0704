//! Bounded persistence queue.
//!
//! The queue is the only hand-off between the synchronous producers (game
//! thread, snapshot timer) and the async persistence worker. Producers never
//! wait: when the queue is full the message is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use roundstat_types::{MatchEvent, RoundEvent, Snapshot};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::health::HealthCounters;

/// A unit of work for the persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistMessage {
    /// A participant snapshot.
    PlayerStats(Box<Snapshot>),
    /// A match started or ended.
    MatchLifecycle(MatchEvent),
    /// A round ended.
    RoundLifecycle(RoundEvent),
}

impl PersistMessage {
    /// Short label for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PlayerStats(_) => "player_stats",
            Self::MatchLifecycle(_) => "match_lifecycle",
            Self::RoundLifecycle(_) => "round_lifecycle",
        }
    }
}

impl From<Snapshot> for PersistMessage {
    fn from(snapshot: Snapshot) -> Self {
        Self::PlayerStats(Box::new(snapshot))
    }
}

/// What happened to an enqueued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The message is queued.
    Accepted,
    /// The queue was at capacity; the message was dropped.
    DroppedFull,
    /// The queue no longer accepts messages; the message was dropped.
    DroppedClosed,
}

impl EnqueueOutcome {
    /// Whether the message was queued.
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistMessage>,
    closed: Arc<AtomicBool>,
    health: Arc<HealthCounters>,
}

/// The single consumer end, owned by the worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<PersistMessage>,
}

/// Create a queue holding at most `capacity` messages (at least one).
pub fn channel(capacity: usize, health: Arc<HealthCounters>) -> (PersistenceQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PersistenceQueue {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            health,
        },
        QueueReceiver { rx },
    )
}

impl PersistenceQueue {
    /// Queue a message without waiting. Never fails; the outcome says whether
    /// the message was kept.
    pub fn enqueue(&self, message: PersistMessage) -> EnqueueOutcome {
        if self.closed.load(Ordering::Acquire) {
            self.health.record_dropped();
            return EnqueueOutcome::DroppedClosed;
        }
        match self.tx.try_send(message) {
            Ok(()) => {
                self.health.record_enqueued();
                EnqueueOutcome::Accepted
            }
            Err(TrySendError::Full(message)) => {
                self.health.record_dropped();
                tracing::trace!(kind = message.label(), "persistence queue full, message dropped");
                EnqueueOutcome::DroppedFull
            }
            Err(TrySendError::Closed(_)) => {
                self.health.record_dropped();
                EnqueueOutcome::DroppedClosed
            }
        }
    }

    /// Queue every snapshot. Returns how many were accepted.
    pub fn enqueue_snapshots(&self, snapshots: Vec<Snapshot>) -> usize {
        snapshots
            .into_iter()
            .map(|snapshot| self.enqueue(snapshot.into()))
            .filter(|outcome| outcome.is_accepted())
            .count()
    }

    /// Stop accepting messages. Already queued messages stay for the worker.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("persistence queue closed to new messages");
        }
    }

    /// Whether [`PersistenceQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages buffered and not yet taken by the worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity().saturating_sub(self.tx.capacity())
    }

    /// Count every buffered message as abandoned. For callers that give up
    /// on the worker; returns how many messages were written off.
    pub fn abandon_pending(&self) -> u64 {
        let pending = u64::try_from(self.pending()).unwrap_or(u64::MAX);
        if pending > 0 {
            self.health.record_abandoned(pending);
            tracing::error!(abandoned = pending, "queued messages abandoned without a drain");
        }
        pending
    }

    /// Shared health counters.
    pub fn health(&self) -> &Arc<HealthCounters> {
        &self.health
    }
}

impl QueueReceiver {
    /// Wait for the next message. `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<PersistMessage> {
        self.rx.recv().await
    }

    /// Take the next message if one is ready.
    pub fn try_recv(&mut self) -> Option<PersistMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Refuse further sends at the channel level; buffered messages remain.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no message is buffered.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
