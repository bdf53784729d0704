//! Match and round lifecycle records.
//!
//! These travel through the same persistence queue as player snapshots so
//! that producer-side ordering is kept up to the point of enqueue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Match lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEventKind {
    /// The match went live.
    Started,
    /// The match finished.
    Ended,
}

impl MatchEventKind {
    /// Database label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Ended => "ended",
        }
    }
}

/// A match started or ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Match key.
    pub match_key: String,
    /// Transition.
    pub kind: MatchEventKind,
    /// Map the match is played on.
    #[serde(default)]
    pub map_name: Option<String>,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
}

/// A round finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEvent {
    /// Match key.
    pub match_key: String,
    /// Round number.
    pub round: u32,
    /// Winning side label.
    #[serde(default)]
    pub winner: Option<String>,
    /// End reason label (elimination, bomb exploded, defused, time).
    #[serde(default)]
    pub reason: Option<String>,
    /// When the round ended.
    pub occurred_at: DateTime<Utc>,
}
