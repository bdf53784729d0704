//! Immutable snapshots handed to the persistence pipeline.
//!
//! A [`Snapshot`] is a full copy of a participant's counters plus every
//! derived metric at capture time. It is never mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::StatCounters;
use crate::ids::{ParticipantId, SnapshotId};

/// Letter grade derived from the performance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    /// Below 10.
    #[serde(rename = "F")]
    F,
    /// 10 and above.
    #[serde(rename = "D")]
    D,
    /// 20 and above.
    #[serde(rename = "C")]
    C,
    /// 30 and above.
    #[serde(rename = "C+")]
    CPlus,
    /// 40 and above.
    #[serde(rename = "B")]
    B,
    /// 50 and above.
    #[serde(rename = "B+")]
    BPlus,
    /// 60 and above.
    #[serde(rename = "A")]
    A,
    /// 70 and above.
    #[serde(rename = "A+")]
    APlus,
    /// 80 and above.
    #[serde(rename = "S")]
    S,
    /// 90 and above.
    #[serde(rename = "S+")]
    SPlus,
}

impl Rank {
    /// Display label as stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F => "F",
            Self::D => "D",
            Self::C => "C",
            Self::CPlus => "C+",
            Self::B => "B",
            Self::BPlus => "B+",
            Self::A => "A",
            Self::APlus => "A+",
            Self::S => "S",
            Self::SPlus => "S+",
        }
    }
}

impl core::fmt::Display for Rank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every metric derived from a participant's counters.
///
/// Percentages are on a 0-100 scale. All values are finite; the survival
/// rating may dip below zero while a round is still in progress (a death is
/// counted before the round is).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Kills per death (kills when deathless).
    pub kd_ratio: f64,
    /// Share of kills that were headshots.
    pub headshot_percentage: f64,
    /// Share of shots that hit.
    pub accuracy_percentage: f64,
    /// Share of rounds with a kill, assist, survival or trade.
    pub kast_percentage: f64,
    /// Average damage per round.
    pub adr: f64,
    /// Survival contribution to the composite rating.
    pub survival_rating: f64,
    /// Multi-kill, clutch, opening and MVP impact (capped at 2.0).
    pub impact_rating: f64,
    /// Per-round composite rating.
    pub composite_rating: f64,
    /// Utility usage score per round.
    pub utility_score: f64,
    /// Weighted 0-100 performance score.
    pub performance_score: f64,
    /// Letter grade for the performance score.
    pub rank: Rank,
    /// Share of clutches won.
    pub clutch_success_rate: f64,
    /// Share of trade opportunities converted.
    pub trade_kill_rate: f64,
    /// Share of opening duels won.
    pub opening_kill_rate: f64,
    /// Share of damaging grenades that hit.
    pub grenade_effectiveness: f64,
    /// Share of flashbangs that blinded an opponent.
    pub flash_effectiveness: f64,
    /// Weapon with the most kills.
    pub top_weapon: Option<String>,
}

impl DerivedMetrics {
    /// Every floating-point metric with its column name.
    pub const fn named_values(&self) -> [(&'static str, f64); 15] {
        [
            ("kd_ratio", self.kd_ratio),
            ("headshot_percentage", self.headshot_percentage),
            ("accuracy_percentage", self.accuracy_percentage),
            ("kast_percentage", self.kast_percentage),
            ("adr", self.adr),
            ("survival_rating", self.survival_rating),
            ("impact_rating", self.impact_rating),
            ("composite_rating", self.composite_rating),
            ("utility_score", self.utility_score),
            ("performance_score", self.performance_score),
            ("clutch_success_rate", self.clutch_success_rate),
            ("trade_kill_rate", self.trade_kill_rate),
            ("opening_kill_rate", self.opening_kill_rate),
            ("grenade_effectiveness", self.grenade_effectiveness),
            ("flash_effectiveness", self.flash_effectiveness),
        ]
    }
}

/// Opaque match tag attached to a snapshot by the match collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchContext {
    /// Match key (never interpreted by the core).
    pub match_key: String,
    /// Round number, when the snapshot belongs to a specific round.
    #[serde(default)]
    pub round: Option<u32>,
}

impl MatchContext {
    /// Context for a whole match.
    pub fn new(match_key: &str) -> Self {
        Self {
            match_key: match_key.to_owned(),
            round: None,
        }
    }

    /// Context for a specific round of a match.
    pub fn for_round(match_key: &str, round: u32) -> Self {
        Self {
            match_key: match_key.to_owned(),
            round: Some(round),
        }
    }
}

/// A snapshot that violates the aggregate invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed snapshot for participant {participant_id}: {reason}")]
pub struct MalformedSnapshot {
    /// Offending participant.
    pub participant_id: ParticipantId,
    /// What was wrong.
    pub reason: String,
}

/// Immutable point-in-time copy of an aggregate plus its derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identity.
    pub id: SnapshotId,
    /// Participant the snapshot belongs to.
    pub participant_id: ParticipantId,
    /// Display name at capture time.
    pub name: String,
    /// Counters at capture time.
    pub counters: StatCounters,
    /// Metrics derived from [`Snapshot::counters`].
    pub metrics: DerivedMetrics,
    /// Match tag supplied at capture time.
    pub context: Option<MatchContext>,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Check the aggregate invariants a well-formed snapshot always holds.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedSnapshot`] naming the first violated invariant.
    pub fn validate(&self) -> Result<(), MalformedSnapshot> {
        let malformed = |reason: String| MalformedSnapshot {
            participant_id: self.participant_id,
            reason,
        };

        if !self.participant_id.is_valid() {
            return Err(malformed("participant id is zero".to_owned()));
        }

        let rounds = &self.counters.rounds;
        for (label, value) in [
            ("rounds_won", rounds.rounds_won),
            ("kast_rounds", rounds.kast_rounds),
            ("rounds_survived", rounds.rounds_survived),
        ] {
            if value > rounds.rounds_played {
                return Err(malformed(format!(
                    "{label} ({value}) exceeds rounds_played ({})",
                    rounds.rounds_played
                )));
            }
        }

        let combat = &self.counters.combat;
        if combat.headshots > combat.kills {
            return Err(malformed(format!(
                "headshots ({}) exceed kills ({})",
                combat.headshots, combat.kills
            )));
        }

        for (label, value) in self.metrics.named_values() {
            if !value.is_finite() {
                return Err(malformed(format!("{label} is {value}")));
            }
        }

        Ok(())
    }

    /// Round number of the attached context, if any.
    pub fn round(&self) -> Option<u32> {
        self.context.as_ref().and_then(|ctx| ctx.round)
    }
}
