//! The persistence worker.
//!
//! One tokio task owns the [`QueueReceiver`]. It waits for a message, keeps
//! collecting until the batch is full or `max_batch_delay` has passed since
//! the first message, splits the batch by destination and writes the groups
//! concurrently through the [`ResiliencePipeline`].
//!
//! On shutdown the queue is closed to producers and whatever is buffered is
//! written until the grace period runs out. A write already in flight when
//! shutdown arrives is bounded by the same deadline. Messages still queued
//! (or in a write cut short by the deadline) are counted as abandoned.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use roundstat_core::config::WorkerConfig;
use roundstat_types::BatchId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::health::HealthCounters;
use crate::queue::{PersistMessage, QueueReceiver};
use crate::resilience::ResiliencePipeline;
use crate::sink::{BatchGroup, BatchWriter, WriteError};

/// Batching and shutdown parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// A batch closes at this many messages (at least 1).
    pub max_batch_size: usize,
    /// A batch closes this long after its first message.
    pub max_batch_delay: Duration,
    /// How long buffered messages are still written after shutdown.
    pub shutdown_grace: Duration,
}

impl WorkerSettings {
    /// Build from configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            max_batch_delay: config.max_batch_delay(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Upper bound on how long the worker takes to stop once shutdown is
    /// requested: a batch still filling closes within `max_batch_delay`, and
    /// the write in flight plus the drain share one grace deadline.
    pub const fn shutdown_budget(&self) -> Duration {
        self.max_batch_delay.saturating_add(self.shutdown_grace)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// What the worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Batches processed (successful or not).
    pub batches: u64,
    /// Messages taken off the queue and handed to a write.
    pub messages: u64,
    /// Messages left unwritten when the grace period ran out.
    pub abandoned: u64,
}

enum Next {
    Message(PersistMessage),
    Shutdown,
    Closed,
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Split a batch by destination, dropping malformed snapshots.
///
/// Groups keep the queue order of their messages; empty groups are omitted.
pub fn group_batch(batch: Vec<PersistMessage>, health: &HealthCounters) -> Vec<BatchGroup> {
    let mut stats = Vec::new();
    let mut matches = Vec::new();
    let mut rounds = Vec::new();

    for message in batch {
        match message {
            PersistMessage::PlayerStats(snapshot) => match snapshot.validate() {
                Ok(()) => stats.push(*snapshot),
                Err(err) => {
                    health.record_malformed();
                    tracing::warn!(
                        participant_id = %err.participant_id,
                        snapshot_id = %snapshot.id,
                        reason = %err.reason,
                        "malformed snapshot skipped"
                    );
                }
            },
            PersistMessage::MatchLifecycle(event) => matches.push(event),
            PersistMessage::RoundLifecycle(event) => rounds.push(event),
        }
    }

    [
        BatchGroup::PlayerStats(stats),
        BatchGroup::MatchEvents(matches),
        BatchGroup::RoundEvents(rounds),
    ]
    .into_iter()
    .filter(|group| !group.is_empty())
    .collect()
}

/// Writes grouped batches through the resilience pipeline.
#[derive(Debug)]
struct BatchSink<W> {
    writer: W,
    pipeline: ResiliencePipeline,
    health: Arc<HealthCounters>,
}

impl<W: BatchWriter> BatchSink<W> {
    async fn write_batch(&self, batch: Vec<PersistMessage>) {
        let batch_id = BatchId::new();
        let groups = group_batch(batch, &self.health);
        join_all(groups.iter().map(|group| self.write_group(batch_id, group))).await;
    }

    async fn write_group(&self, batch_id: BatchId, group: &BatchGroup) {
        let result = self
            .pipeline
            .execute(group.label(), || self.writer.write(group))
            .await;

        match result {
            Ok(rows) => {
                self.health.record_batch_written(rows);
                tracing::debug!(
                    %batch_id,
                    group = group.label(),
                    items = group.len(),
                    rows,
                    "batch group written"
                );
            }
            Err(WriteError::CircuitOpen) => {
                self.health.record_batch_dropped_circuit_open();
                tracing::error!(
                    %batch_id,
                    group = group.label(),
                    items = group.len(),
                    "circuit open; batch group dropped"
                );
            }
            Err(err) => {
                self.health.record_batch_failed();
                tracing::error!(
                    %batch_id,
                    group = group.label(),
                    items = group.len(),
                    error = %err,
                    "batch group write failed; data lost"
                );
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        tracing::debug!("shutdown sender dropped");
    }
}

/// Drains the persistence queue into a [`BatchWriter`].
#[derive(Debug)]
pub struct PersistenceWorker<W> {
    rx: QueueReceiver,
    sink: BatchSink<W>,
    settings: WorkerSettings,
    shutdown: watch::Receiver<bool>,
}

impl<W: BatchWriter> PersistenceWorker<W> {
    /// Assemble a worker. Sending `true` on the `shutdown` channel (or
    /// dropping its sender) starts the drain.
    pub const fn new(
        rx: QueueReceiver,
        writer: W,
        pipeline: ResiliencePipeline,
        settings: WorkerSettings,
        health: Arc<HealthCounters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rx,
            sink: BatchSink {
                writer,
                pipeline,
                health,
            },
            settings,
            shutdown,
        }
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> JoinHandle<WorkerReport> {
        tokio::spawn(self.run())
    }

    /// Process batches until shutdown, then drain.
    ///
    /// A shutdown that arrives mid-write starts the grace period right away:
    /// the write in flight (retries included) and the drain share one
    /// deadline.
    pub async fn run(mut self) -> WorkerReport {
        tracing::info!(
            max_batch_size = self.settings.max_batch_size,
            max_batch_delay_ms = u64::try_from(self.settings.max_batch_delay.as_millis()).unwrap_or(u64::MAX),
            "persistence worker started"
        );
        let mut report = WorkerReport::default();
        let mut deadline = None;

        loop {
            match self.next().await {
                Next::Message(first) => {
                    let batch = self.fill_batch(first).await;
                    report.batches = report.batches.saturating_add(1);
                    report.messages = report.messages.saturating_add(count(batch.len()));
                    deadline = self.write_until_shutdown(batch, &mut report).await;
                    if deadline.is_some() {
                        break;
                    }
                }
                Next::Shutdown => break,
                Next::Closed => {
                    tracing::info!("every producer is gone; persistence worker stopping");
                    break;
                }
            }
        }

        self.drain(deadline, &mut report).await;
        tracing::info!(
            batches = report.batches,
            messages = report.messages,
            abandoned = report.abandoned,
            "persistence worker stopped"
        );
        report
    }

    async fn next(&mut self) -> Next {
        tokio::select! {
            biased;
            () = stop_requested(&mut self.shutdown) => Next::Shutdown,
            message = self.rx.recv() => message.map_or(Next::Closed, Next::Message),
        }
    }

    async fn fill_batch(&mut self, first: PersistMessage) -> Vec<PersistMessage> {
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(self.settings.max_batch_delay);
        tokio::pin!(deadline);

        while batch.len() < self.settings.max_batch_size {
            tokio::select! {
                biased;
                () = &mut deadline => break,
                message = self.rx.recv() => match message {
                    Some(message) => batch.push(message),
                    None => break,
                },
            }
        }
        batch
    }

    /// Write one batch. When shutdown is requested before the write finishes,
    /// the write keeps running until the grace deadline, which is returned.
    /// A write cut off at the deadline counts its messages as abandoned.
    async fn write_until_shutdown(
        &mut self,
        batch: Vec<PersistMessage>,
        report: &mut WorkerReport,
    ) -> Option<Instant> {
        let size = count(batch.len());
        let write = self.sink.write_batch(batch);
        tokio::pin!(write);

        tokio::select! {
            biased;
            () = &mut write => return None,
            () = stop_requested(&mut self.shutdown) => {}
        }

        let grace = tokio::time::sleep(self.settings.shutdown_grace);
        let deadline = grace.deadline();
        tokio::pin!(grace);
        tracing::info!(items = size, "shutdown requested during a batch write");

        tokio::select! {
            biased;
            () = &mut write => {}
            () = &mut grace => {
                report.abandoned = report.abandoned.saturating_add(size);
                tracing::error!(items = size, "shutdown grace elapsed during a batch write");
            }
        }
        Some(deadline)
    }

    async fn drain(&mut self, deadline: Option<Instant>, report: &mut WorkerReport) {
        self.rx.close();
        tracing::info!(
            pending = self.rx.len(),
            grace_ms = u64::try_from(self.settings.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
            "persistence worker draining"
        );

        let grace = match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline),
            None => tokio::time::sleep(self.settings.shutdown_grace),
        };
        tokio::pin!(grace);

        loop {
            let mut batch = Vec::new();
            while batch.len() < self.settings.max_batch_size {
                match self.rx.try_recv() {
                    Some(message) => batch.push(message),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }

            let size = count(batch.len());
            report.batches = report.batches.saturating_add(1);
            report.messages = report.messages.saturating_add(size);
            tokio::select! {
                biased;
                () = &mut grace => {
                    report.abandoned = report.abandoned.saturating_add(size);
                    break;
                }
                () = self.sink.write_batch(batch) => {}
            }
        }

        report.abandoned = report.abandoned.saturating_add(count(self.rx.len()));
        if report.abandoned > 0 {
            self.sink.health.record_abandoned(report.abandoned);
            tracing::error!(
                abandoned = report.abandoned,
                "shutdown grace elapsed; queued messages abandoned"
            );
        }
    }
}
