//! Pipeline health counters.
//!
//! Lock-free counters shared by the queue producers, the worker and the
//! circuit breaker. Monitoring reads a consistent-enough copy through
//! [`HealthCounters::snapshot`].

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::resilience::CircuitState;

/// Shared counters describing what the pipeline did.
#[derive(Debug, Default)]
pub struct HealthCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    batches_dropped_circuit_open: AtomicU64,
    rows_written: AtomicU64,
    rows_skipped_malformed: AtomicU64,
    items_abandoned: AtomicU64,
    circuit_opened: AtomicU64,
    circuit_half_opened: AtomicU64,
    circuit_closed: AtomicU64,
    circuit_state: AtomicU8,
}

/// Point-in-time copy of [`HealthCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Messages accepted by the queue.
    pub enqueued: u64,
    /// Messages dropped because the queue was full or closed.
    pub dropped: u64,
    /// Batch groups written successfully.
    pub batches_written: u64,
    /// Batch groups that failed after every retry.
    pub batches_failed: u64,
    /// Batch groups dropped because the circuit was open.
    pub batches_dropped_circuit_open: u64,
    /// Rows inserted or updated.
    pub rows_written: u64,
    /// Snapshots skipped as malformed.
    pub rows_skipped_malformed: u64,
    /// Messages still queued when the shutdown grace period ran out.
    pub items_abandoned: u64,
    /// Transitions into the open state.
    pub circuit_opened: u64,
    /// Transitions into the half-open state.
    pub circuit_half_opened: u64,
    /// Transitions back to closed.
    pub circuit_closed: u64,
    /// Current circuit state.
    pub circuit_state: CircuitState,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl HealthCounters {
    /// Fresh counters with a closed circuit.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        bump(&self.enqueued, 1);
    }

    pub(crate) fn record_dropped(&self) {
        bump(&self.dropped, 1);
    }

    pub(crate) fn record_batch_written(&self, rows: u64) {
        bump(&self.batches_written, 1);
        bump(&self.rows_written, rows);
    }

    pub(crate) fn record_batch_failed(&self) {
        bump(&self.batches_failed, 1);
    }

    pub(crate) fn record_batch_dropped_circuit_open(&self) {
        bump(&self.batches_dropped_circuit_open, 1);
    }

    pub(crate) fn record_malformed(&self) {
        bump(&self.rows_skipped_malformed, 1);
    }

    pub(crate) fn record_abandoned(&self, items: u64) {
        bump(&self.items_abandoned, items);
    }

    pub(crate) fn record_transition(&self, to: CircuitState) {
        self.circuit_state.store(to.as_u8(), Ordering::Release);
        match to {
            CircuitState::Open => bump(&self.circuit_opened, 1),
            CircuitState::HalfOpen => bump(&self.circuit_half_opened, 1),
            CircuitState::Closed => bump(&self.circuit_closed, 1),
        }
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> HealthSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HealthSnapshot {
            enqueued: load(&self.enqueued),
            dropped: load(&self.dropped),
            batches_written: load(&self.batches_written),
            batches_failed: load(&self.batches_failed),
            batches_dropped_circuit_open: load(&self.batches_dropped_circuit_open),
            rows_written: load(&self.rows_written),
            rows_skipped_malformed: load(&self.rows_skipped_malformed),
            items_abandoned: load(&self.items_abandoned),
            circuit_opened: load(&self.circuit_opened),
            circuit_half_opened: load(&self.circuit_half_opened),
            circuit_closed: load(&self.circuit_closed),
            circuit_state: CircuitState::from_u8(self.circuit_state.load(Ordering::Acquire)),
        }
    }
}
