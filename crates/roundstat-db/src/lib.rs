//! `PostgreSQL` persistence for Roundstat.
//!
//! Holds the connection pool, the embedded migrations and the
//! [`UpsertStore`], which writes snapshot and lifecycle batches with one
//! staged, idempotent merge statement per table.
//!
//! ```text
//! Snapshot batch --> UpsertStore::upsert_snapshots
//!                      |-- participant_stats          (one row per participant)
//!                      |-- participant_weapon_stats   (one row per weapon)
//!                      +-- participant_round_history  (one row per round)
//! MatchEvent batch --> match_events
//! RoundEvent batch --> round_events
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and migrations
//! - [`upsert_store`] -- Staged keyed upserts and read-back queries
//! - [`error`] -- Shared error types

pub mod error;
pub mod postgres;
pub mod upsert_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use postgres::PostgresPool;
pub use upsert_store::{
    HistoryRow, MatchEventRow, RoundEventRow, StatRow, UpsertStore, UpsertSummary, WeaponRow,
};
