//! Typed gameplay facts accepted by the aggregation core.
//!
//! The event-translation layer turns raw engine callbacks into these
//! structs. Every fact is validated with [`Fact::validate`] before it is
//! applied, so the core never has to reason about negative damage, empty
//! weapon names or nonsense blind durations.

use serde::{Deserialize, Serialize};

/// Longest weapon identifier accepted (engine class names are short).
pub const MAX_WEAPON_NAME_LEN: usize = 64;

/// Upper bound for a single damage event. Anything above is a translation bug.
pub const MAX_DAMAGE_PER_EVENT: u32 = 1_000;

/// Upper bound for a single flash blind duration in milliseconds.
pub const MAX_BLIND_DURATION_MS: u32 = 10_000;

/// Upper bound for a single money transaction.
pub const MAX_MONEY_PER_EVENT: u32 = 100_000;

/// Kind of thrown utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrenadeKind {
    /// Flashbang.
    Flash,
    /// Smoke grenade.
    Smoke,
    /// High-explosive grenade.
    He,
    /// Molotov or incendiary.
    Molotov,
    /// Decoy grenade.
    Decoy,
}

/// A single gameplay fact about one participant.
///
/// Facts describe what happened to the participant they are addressed to:
/// a kill is sent to the killer, the matching [`Fact::Death`] to the victim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fact {
    /// The participant killed an opponent.
    Kill {
        /// Weapon class used for the kill.
        weapon: String,
        /// Whether the killing shot was a headshot.
        #[serde(default)]
        headshot: bool,
        /// Whether this was the first kill of the round (opening duel won).
        #[serde(default)]
        first_of_round: bool,
        /// Whether the kill avenged a teammate within the trade window.
        #[serde(default)]
        trade: bool,
    },
    /// The participant died.
    Death {
        /// Whether this was the first death of the round (opening duel lost).
        #[serde(default)]
        first_of_round: bool,
    },
    /// The participant assisted a kill.
    Assist {
        /// Whether the assist came from a flashbang.
        #[serde(default)]
        flash: bool,
    },
    /// The participant's death was avenged by a teammate.
    Traded,
    /// A teammate died close enough that a trade kill was possible.
    TradeOpportunity,
    /// The participant dealt damage.
    DamageDealt {
        /// Weapon class that dealt the damage.
        weapon: String,
        /// Health removed from the opponent.
        amount: u32,
        /// Whether the damage came from thrown utility.
        #[serde(default)]
        utility: bool,
    },
    /// The participant took damage.
    DamageTaken {
        /// Health lost.
        amount: u32,
    },
    /// The participant fired a shot.
    ShotFired {
        /// Weapon class fired.
        weapon: String,
    },
    /// A shot fired by the participant hit an opponent.
    ShotHit {
        /// Weapon class that hit.
        weapon: String,
    },
    /// The participant threw a grenade.
    GrenadeThrown {
        /// Kind of grenade.
        grenade: GrenadeKind,
    },
    /// A grenade thrown by the participant had an effect (blinded, damaged,
    /// blocked vision).
    GrenadeEffective {
        /// Kind of grenade.
        grenade: GrenadeKind,
    },
    /// The participant blinded an opponent.
    EnemyFlashed {
        /// Blind duration in milliseconds.
        duration_ms: u32,
    },
    /// The participant planted the bomb.
    BombPlanted,
    /// The participant defused the bomb.
    BombDefused,
    /// The participant spent money.
    MoneySpent {
        /// Amount spent.
        amount: u32,
    },
    /// The participant earned money.
    MoneyEarned {
        /// Amount earned.
        amount: u32,
    },
    /// The participant bought an item.
    ItemPurchased,
    /// The participant was the round MVP.
    Mvp,
    /// A clutch situation involving the participant resolved.
    ClutchResult {
        /// Whether the participant won the clutch.
        won: bool,
    },
}

/// A fact that failed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactError {
    /// Weapon name was empty.
    #[error("weapon name is empty")]
    EmptyWeapon,

    /// Weapon name exceeded [`MAX_WEAPON_NAME_LEN`].
    #[error("weapon name is {len} bytes, limit is {MAX_WEAPON_NAME_LEN}")]
    WeaponTooLong {
        /// Actual length in bytes.
        len: usize,
    },

    /// A numeric payload was outside its plausible range.
    #[error("{field} = {value} exceeds limit {limit}")]
    OutOfRange {
        /// Name of the offending payload field.
        field: &'static str,
        /// Value received.
        value: u32,
        /// Inclusive upper bound.
        limit: u32,
    },
}

impl Fact {
    /// Check the payload for plausibility.
    ///
    /// # Errors
    ///
    /// Returns a [`FactError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), FactError> {
        match self {
            Self::Kill { weapon, .. }
            | Self::ShotFired { weapon }
            | Self::ShotHit { weapon } => check_weapon(weapon),
            Self::DamageDealt { weapon, amount, .. } => {
                check_weapon(weapon)?;
                check_range("amount", *amount, MAX_DAMAGE_PER_EVENT)
            }
            Self::DamageTaken { amount } => check_range("amount", *amount, MAX_DAMAGE_PER_EVENT),
            Self::EnemyFlashed { duration_ms } => {
                check_range("duration_ms", *duration_ms, MAX_BLIND_DURATION_MS)
            }
            Self::MoneySpent { amount } | Self::MoneyEarned { amount } => {
                check_range("amount", *amount, MAX_MONEY_PER_EVENT)
            }
            Self::Death { .. }
            | Self::Assist { .. }
            | Self::Traded
            | Self::TradeOpportunity
            | Self::GrenadeThrown { .. }
            | Self::GrenadeEffective { .. }
            | Self::BombPlanted
            | Self::BombDefused
            | Self::ItemPurchased
            | Self::Mvp
            | Self::ClutchResult { .. } => Ok(()),
        }
    }

    /// Short label for logs and metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Kill { .. } => "kill",
            Self::Death { .. } => "death",
            Self::Assist { .. } => "assist",
            Self::Traded => "traded",
            Self::TradeOpportunity => "trade_opportunity",
            Self::DamageDealt { .. } => "damage_dealt",
            Self::DamageTaken { .. } => "damage_taken",
            Self::ShotFired { .. } => "shot_fired",
            Self::ShotHit { .. } => "shot_hit",
            Self::GrenadeThrown { .. } => "grenade_thrown",
            Self::GrenadeEffective { .. } => "grenade_effective",
            Self::EnemyFlashed { .. } => "enemy_flashed",
            Self::BombPlanted => "bomb_planted",
            Self::BombDefused => "bomb_defused",
            Self::MoneySpent { .. } => "money_spent",
            Self::MoneyEarned { .. } => "money_earned",
            Self::ItemPurchased => "item_purchased",
            Self::Mvp => "mvp",
            Self::ClutchResult { .. } => "clutch_result",
        }
    }
}

fn check_weapon(weapon: &str) -> Result<(), FactError> {
    if weapon.trim().is_empty() {
        return Err(FactError::EmptyWeapon);
    }
    if weapon.len() > MAX_WEAPON_NAME_LEN {
        return Err(FactError::WeaponTooLong { len: weapon.len() });
    }
    Ok(())
}

const fn check_range(field: &'static str, value: u32, limit: u32) -> Result<(), FactError> {
    if value > limit {
        return Err(FactError::OutOfRange {
            field,
            value,
            limit,
        });
    }
    Ok(())
}
