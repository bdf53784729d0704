//! Backpressure-aware persistence for Roundstat snapshots.
//!
//! Producers hand snapshots and lifecycle events to a bounded
//! [`PersistenceQueue`] and never wait on I/O. A single
//! [`PersistenceWorker`] task drains the queue, batches by size and delay,
//! and writes each destination group through a [`ResiliencePipeline`]
//! (retry, circuit breaker, timeout) into a [`BatchWriter`].
//!
//! ```text
//! SessionStore::capture_snapshots
//!     |
//!     v
//! PersistenceQueue::enqueue  --full-->  dropped (counted)
//!     |
//!     v
//! PersistenceWorker --batch--> group by destination
//!     |
//!     v
//! ResiliencePipeline --> BatchWriter (PostgresWriter -> UpsertStore)
//! ```
//!
//! # Modules
//!
//! - [`queue`] -- Bounded drop-on-full queue
//! - [`worker`] -- Batching drain loop and shutdown
//! - [`resilience`] -- Retry, circuit breaker and timeout
//! - [`sink`] -- Batch groups, the writer seam and error classification
//! - [`health`] -- Shared health counters

pub mod health;
pub mod queue;
pub mod resilience;
pub mod sink;
pub mod worker;

pub use health::{HealthCounters, HealthSnapshot};
pub use queue::{EnqueueOutcome, PersistMessage, PersistenceQueue, QueueReceiver, channel};
pub use resilience::{BreakerPolicy, CircuitBreaker, CircuitState, ResiliencePipeline, RetryPolicy};
pub use sink::{BatchGroup, BatchWriter, PostgresWriter, WriteError};
pub use worker::{PersistenceWorker, WorkerReport, WorkerSettings, group_batch};
