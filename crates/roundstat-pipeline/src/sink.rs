//! Batch destinations.
//!
//! A [`BatchWriter`] persists one [`BatchGroup`] and reports how many rows it
//! touched. The worker is generic over the writer so the resilience policy
//! never sees the storage dialect; [`PostgresWriter`] is the production
//! implementation.

use std::future::Future;

use roundstat_db::{DbError, PostgresPool, UpsertStore};
use roundstat_types::{MatchEvent, RoundEvent, Snapshot};

/// Why a batch write failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Worth retrying: timeouts, dropped connections, pool exhaustion.
    #[error("transient write failure: {0}")]
    Transient(String),

    /// Retrying will not help: constraint violations, bad SQL, bad data.
    #[error("permanent write failure: {0}")]
    Permanent(String),

    /// The circuit breaker refused the attempt.
    #[error("circuit open; write not attempted")]
    CircuitOpen,
}

impl WriteError {
    /// Classify a driver error.
    pub fn from_sqlx(err: &sqlx::Error) -> Self {
        let transient = match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
            _ => false,
        };
        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }

    /// Whether the error is worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// `SQLSTATE` classes that describe the server's condition rather than the
/// statement: connection exceptions (08), transaction rollbacks such as
/// serialization failures and deadlocks (40), insufficient resources (53),
/// operator intervention (57).
fn is_transient_sqlstate(code: &str) -> bool {
    ["08", "40", "53", "57"]
        .iter()
        .any(|class| code.starts_with(class))
}

impl From<DbError> for WriteError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Postgres(e) => Self::from_sqlx(&e),
            other => Self::Permanent(other.to_string()),
        }
    }
}

/// Messages of one destination, written together.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchGroup {
    /// Participant snapshots (stats, weapons and round history tables).
    PlayerStats(Vec<Snapshot>),
    /// Match lifecycle events.
    MatchEvents(Vec<MatchEvent>),
    /// Round lifecycle events.
    RoundEvents(Vec<RoundEvent>),
}

impl BatchGroup {
    /// Destination label for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PlayerStats(_) => "player_stats",
            Self::MatchEvents(_) => "match_events",
            Self::RoundEvents(_) => "round_events",
        }
    }

    /// Number of items in the group.
    pub fn len(&self) -> usize {
        match self {
            Self::PlayerStats(items) => items.len(),
            Self::MatchEvents(items) => items.len(),
            Self::RoundEvents(items) => items.len(),
        }
    }

    /// Whether the group holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persists batch groups.
pub trait BatchWriter: Send + Sync + 'static {
    /// Write one group, returning the number of rows touched. Must be
    /// idempotent: the same group may be written more than once.
    fn write(&self, group: &BatchGroup) -> impl Future<Output = Result<u64, WriteError>> + Send;
}

/// Writes batch groups to `PostgreSQL` through the [`UpsertStore`].
#[derive(Debug, Clone)]
pub struct PostgresWriter {
    pool: PostgresPool,
}

impl PostgresWriter {
    /// Wrap a connection pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

impl BatchWriter for PostgresWriter {
    fn write(&self, group: &BatchGroup) -> impl Future<Output = Result<u64, WriteError>> + Send {
        let store = UpsertStore::new(self.pool.pool());
        async move {
            let rows = match group {
                BatchGroup::PlayerStats(snapshots) => store.upsert_snapshots(snapshots).await?.total(),
                BatchGroup::MatchEvents(events) => store.upsert_match_events(events).await?,
                BatchGroup::RoundEvents(events) => store.upsert_round_events(events).await?,
            };
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_io_errors_are_transient() {
        assert!(WriteError::from_sqlx(&sqlx::Error::PoolTimedOut).is_transient());
        assert!(WriteError::from_sqlx(&sqlx::Error::PoolClosed).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(WriteError::from_sqlx(&sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn decode_and_missing_rows_are_permanent() {
        assert!(!WriteError::from_sqlx(&sqlx::Error::RowNotFound).is_transient());
        assert!(matches!(
            WriteError::from(DbError::Config("bad".to_owned())),
            WriteError::Permanent(_)
        ));
    }

    #[test]
    fn sqlstate_classes() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("57P01"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("42601"));
    }

    #[test]
    fn group_len_counts_items() {
        let group = BatchGroup::MatchEvents(Vec::new());
        assert!(group.is_empty());
        assert_eq!(group.label(), "match_events");
    }
}
