//! Shared type definitions for the Roundstat aggregation pipeline.
//!
//! This crate is the single source of truth for the data that crosses crate
//! boundaries: the typed facts coming in from the event-translation layer,
//! the live per-participant aggregate, and the immutable snapshots and
//! lifecycle records going out to persistence.
//!
//! # Modules
//!
//! - [`ids`] -- Participant and snapshot identifiers
//! - [`facts`] -- Validated gameplay facts
//! - [`aggregate`] -- Mutable per-participant counters
//! - [`snapshot`] -- Immutable snapshots, derived metrics and match context
//! - [`lifecycle`] -- Match and round lifecycle records

pub mod aggregate;
pub mod facts;
pub mod ids;
pub mod lifecycle;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use aggregate::{
    Aggregate, CombatCounters, EconomyCounters, MultiKills, ObjectiveCounters, RoundCounters,
    RoundScratch, StatCounters, UtilityCounters, WeaponLine, WeaponStats,
};
pub use facts::{Fact, FactError, GrenadeKind};
pub use ids::{BatchId, ParticipantId, SnapshotId};
pub use lifecycle::{MatchEvent, MatchEventKind, RoundEvent};
pub use snapshot::{DerivedMetrics, MalformedSnapshot, MatchContext, Rank, Snapshot};
