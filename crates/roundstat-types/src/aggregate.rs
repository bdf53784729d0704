//! Live per-participant counters.
//!
//! An [`Aggregate`] is the mutable state for one participant. Counters are
//! grouped by category and only ever grow: every increment saturates at
//! `u32::MAX` instead of wrapping. Round-scoped counters (rounds played,
//! rounds won, KAST rounds, multi-kill buckets) only move inside
//! [`Aggregate::close_round`], which keeps them consistent with each other.

use serde::{Deserialize, Serialize};

use crate::facts::{Fact, GrenadeKind};
use crate::ids::ParticipantId;

/// Add `by` to a counter without wrapping.
const fn bump(counter: &mut u32, by: u32) {
    *counter = counter.saturating_add(by);
}

/// Kill, death and duel counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatCounters {
    /// Opponents killed.
    pub kills: u32,
    /// Times killed.
    pub deaths: u32,
    /// Kill assists.
    pub assists: u32,
    /// Assists credited to a flashbang.
    pub flash_assists: u32,
    /// Kills with a headshot.
    pub headshots: u32,
    /// Health removed from opponents.
    pub damage_dealt: u32,
    /// Health lost.
    pub damage_taken: u32,
    /// Shots fired.
    pub shots_fired: u32,
    /// Shots that hit an opponent.
    pub shots_hit: u32,
    /// Opening duels won.
    pub first_kills: u32,
    /// Opening duels lost.
    pub first_deaths: u32,
    /// Kills that traded a fallen teammate.
    pub trade_kills: u32,
    /// Situations where a trade kill was possible.
    pub trade_opportunities: u32,
    /// Deaths that a teammate avenged.
    pub traded_deaths: u32,
}

/// Rounds with two or more kills, bucketed by kill count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiKills {
    /// Rounds with exactly two kills.
    pub two: u32,
    /// Rounds with exactly three kills.
    pub three: u32,
    /// Rounds with exactly four kills.
    pub four: u32,
    /// Rounds with five or more kills.
    pub five: u32,
}

/// Round outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCounters {
    /// Completed rounds the participant took part in.
    pub rounds_played: u32,
    /// Completed rounds won by the participant's side.
    pub rounds_won: u32,
    /// Rounds with a kill, assist, survival or trade.
    pub kast_rounds: u32,
    /// Rounds the participant was alive at the end of.
    pub rounds_survived: u32,
    /// Round MVP awards.
    pub mvps: u32,
    /// Clutch situations won.
    pub clutch_wins: u32,
    /// Clutch situations lost.
    pub clutch_losses: u32,
    /// Multi-kill rounds.
    pub multi_kills: MultiKills,
}

/// Money counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyCounters {
    /// Money spent on equipment.
    pub money_spent: u32,
    /// Money earned from kills, objectives and round rewards.
    pub money_earned: u32,
    /// Items bought.
    pub items_purchased: u32,
}

/// Thrown utility counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityCounters {
    /// Flashbangs thrown.
    pub flashes_thrown: u32,
    /// Smokes thrown.
    pub smokes_thrown: u32,
    /// HE grenades thrown.
    pub he_grenades_thrown: u32,
    /// Molotovs and incendiaries thrown.
    pub molotovs_thrown: u32,
    /// Decoys thrown.
    pub decoys_thrown: u32,
    /// Flashbangs that blinded at least one opponent.
    pub effective_flashes: u32,
    /// Smokes that blocked an engagement.
    pub effective_smokes: u32,
    /// HE grenades and molotovs that damaged an opponent.
    pub effective_grenades: u32,
    /// Opponents blinded.
    pub enemies_flashed: u32,
    /// Total opponent blind time in milliseconds.
    pub blind_duration_ms: u32,
    /// Damage dealt with utility.
    pub utility_damage: u32,
}

impl UtilityCounters {
    /// Damaging grenades thrown (HE plus molotov).
    pub const fn damaging_grenades_thrown(&self) -> u32 {
        self.he_grenades_thrown.saturating_add(self.molotovs_thrown)
    }
}

/// Bomb objective counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveCounters {
    /// Bombs planted.
    pub bomb_plants: u32,
    /// Bombs defused.
    pub bomb_defuses: u32,
}

/// Per-weapon breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponStats {
    /// Kills with the weapon.
    pub kills: u32,
    /// Headshot kills with the weapon.
    pub headshots: u32,
    /// Shots fired.
    pub shots: u32,
    /// Shots that hit.
    pub hits: u32,
    /// Damage dealt.
    pub damage: u32,
}

/// One weapon entry; lines keep first-use order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponLine {
    /// Weapon class name.
    pub weapon: String,
    /// Counters for the weapon.
    pub stats: WeaponStats,
}

/// Every lifetime counter of a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounters {
    /// Combat counters.
    pub combat: CombatCounters,
    /// Round counters.
    pub rounds: RoundCounters,
    /// Economy counters.
    pub economy: EconomyCounters,
    /// Utility counters.
    pub utility: UtilityCounters,
    /// Objective counters.
    pub objective: ObjectiveCounters,
    /// Per-weapon lines in first-use order.
    pub weapons: Vec<WeaponLine>,
}

impl StatCounters {
    /// Look up the counters for a weapon.
    pub fn weapon(&self, weapon: &str) -> Option<&WeaponStats> {
        self.weapons
            .iter()
            .find(|line| line.weapon == weapon)
            .map(|line| &line.stats)
    }

    /// Counters for a weapon, inserting an empty line on first use.
    fn weapon_mut(&mut self, weapon: &str) -> Option<&mut WeaponStats> {
        let pos = if let Some(pos) = self.weapons.iter().position(|l| l.weapon == weapon) {
            pos
        } else {
            self.weapons.push(WeaponLine {
                weapon: weapon.to_owned(),
                stats: WeaponStats::default(),
            });
            self.weapons.len().saturating_sub(1)
        };
        self.weapons.get_mut(pos).map(|line| &mut line.stats)
    }
}

/// Scratch flags for the round in progress. Folded by
/// [`Aggregate::close_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundScratch {
    /// Kills so far this round.
    pub kills: u32,
    /// Whether the participant got a kill.
    pub had_kill: bool,
    /// Whether the participant got an assist.
    pub had_assist: bool,
    /// Whether the participant is still alive.
    pub alive: bool,
    /// Whether the participant's death was traded.
    pub traded: bool,
}

impl Default for RoundScratch {
    fn default() -> Self {
        Self {
            kills: 0,
            had_kill: false,
            had_assist: false,
            alive: true,
            traded: false,
        }
    }
}

impl RoundScratch {
    /// Whether the round counts toward KAST.
    pub const fn is_kast(&self) -> bool {
        self.had_kill || self.had_assist || self.alive || self.traded
    }
}

/// Mutable aggregate for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    id: ParticipantId,
    name: String,
    counters: StatCounters,
    round: RoundScratch,
    dirty: bool,
}

impl Aggregate {
    /// Create an empty aggregate. New aggregates start dirty so their first
    /// capture persists the participant.
    pub fn new(id: ParticipantId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            counters: StatCounters::default(),
            round: RoundScratch::default(),
            dirty: true,
        }
    }

    /// Participant identity.
    pub const fn id(&self) -> ParticipantId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifetime counters.
    pub const fn counters(&self) -> &StatCounters {
        &self.counters
    }

    /// Round-in-progress flags.
    pub const fn round(&self) -> &RoundScratch {
        &self.round
    }

    /// Whether the aggregate changed since the last dirty-clearing capture.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the aggregate as changed.
    pub const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the changed flag. Only the capturing store calls this, inside the
    /// same critical section that read the counters.
    pub const fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Replace the display name. Returns `true` if it changed.
    pub fn rename(&mut self, name: &str) -> bool {
        if self.name == name {
            return false;
        }
        name.clone_into(&mut self.name);
        self.dirty = true;
        true
    }

    /// Apply a validated fact to the counters.
    pub fn apply(&mut self, fact: &Fact) {
        let c = &mut self.counters;
        match fact {
            Fact::Kill {
                weapon,
                headshot,
                first_of_round,
                trade,
            } => {
                bump(&mut c.combat.kills, 1);
                if *headshot {
                    bump(&mut c.combat.headshots, 1);
                }
                if *first_of_round {
                    bump(&mut c.combat.first_kills, 1);
                }
                if *trade {
                    bump(&mut c.combat.trade_kills, 1);
                }
                if let Some(w) = c.weapon_mut(weapon) {
                    bump(&mut w.kills, 1);
                    if *headshot {
                        bump(&mut w.headshots, 1);
                    }
                }
                bump(&mut self.round.kills, 1);
                self.round.had_kill = true;
            }
            Fact::Death { first_of_round } => {
                bump(&mut c.combat.deaths, 1);
                if *first_of_round {
                    bump(&mut c.combat.first_deaths, 1);
                }
                self.round.alive = false;
            }
            Fact::Assist { flash } => {
                bump(&mut c.combat.assists, 1);
                if *flash {
                    bump(&mut c.combat.flash_assists, 1);
                }
                self.round.had_assist = true;
            }
            Fact::Traded => {
                bump(&mut c.combat.traded_deaths, 1);
                self.round.traded = true;
            }
            Fact::TradeOpportunity => bump(&mut c.combat.trade_opportunities, 1),
            Fact::DamageDealt {
                weapon,
                amount,
                utility,
            } => {
                bump(&mut c.combat.damage_dealt, *amount);
                if *utility {
                    bump(&mut c.utility.utility_damage, *amount);
                }
                if let Some(w) = c.weapon_mut(weapon) {
                    bump(&mut w.damage, *amount);
                }
            }
            Fact::DamageTaken { amount } => bump(&mut c.combat.damage_taken, *amount),
            Fact::ShotFired { weapon } => {
                bump(&mut c.combat.shots_fired, 1);
                if let Some(w) = c.weapon_mut(weapon) {
                    bump(&mut w.shots, 1);
                }
            }
            Fact::ShotHit { weapon } => {
                bump(&mut c.combat.shots_hit, 1);
                if let Some(w) = c.weapon_mut(weapon) {
                    bump(&mut w.hits, 1);
                }
            }
            Fact::GrenadeThrown { grenade } => {
                let u = &mut c.utility;
                match grenade {
                    GrenadeKind::Flash => bump(&mut u.flashes_thrown, 1),
                    GrenadeKind::Smoke => bump(&mut u.smokes_thrown, 1),
                    GrenadeKind::He => bump(&mut u.he_grenades_thrown, 1),
                    GrenadeKind::Molotov => bump(&mut u.molotovs_thrown, 1),
                    GrenadeKind::Decoy => bump(&mut u.decoys_thrown, 1),
                }
            }
            Fact::GrenadeEffective { grenade } => {
                let u = &mut c.utility;
                match grenade {
                    GrenadeKind::Flash => bump(&mut u.effective_flashes, 1),
                    GrenadeKind::Smoke => bump(&mut u.effective_smokes, 1),
                    GrenadeKind::He | GrenadeKind::Molotov => bump(&mut u.effective_grenades, 1),
                    GrenadeKind::Decoy => {}
                }
            }
            Fact::EnemyFlashed { duration_ms } => {
                bump(&mut c.utility.enemies_flashed, 1);
                bump(&mut c.utility.blind_duration_ms, *duration_ms);
            }
            Fact::BombPlanted => bump(&mut c.objective.bomb_plants, 1),
            Fact::BombDefused => bump(&mut c.objective.bomb_defuses, 1),
            Fact::MoneySpent { amount } => bump(&mut c.economy.money_spent, *amount),
            Fact::MoneyEarned { amount } => bump(&mut c.economy.money_earned, *amount),
            Fact::ItemPurchased => bump(&mut c.economy.items_purchased, 1),
            Fact::Mvp => bump(&mut c.rounds.mvps, 1),
            Fact::ClutchResult { won } => {
                if *won {
                    bump(&mut c.rounds.clutch_wins, 1);
                } else {
                    bump(&mut c.rounds.clutch_losses, 1);
                }
            }
        }
        self.dirty = true;
    }

    /// Reset the round scratch without folding it (round start, late join).
    pub fn begin_round(&mut self) {
        self.round = RoundScratch::default();
    }

    /// Fold the finished round into the lifetime counters and reset the
    /// scratch flags.
    ///
    /// Rounds played and rounds won move together here and nowhere else.
    pub fn close_round(&mut self, won: bool) {
        let rounds = &mut self.counters.rounds;
        let round = &self.round;

        // Saturation must keep rounds_won <= rounds_played.
        if rounds.rounds_played < u32::MAX {
            bump(&mut rounds.rounds_played, 1);
            if won {
                bump(&mut rounds.rounds_won, 1);
            }
            if round.is_kast() {
                bump(&mut rounds.kast_rounds, 1);
            }
            if round.alive {
                bump(&mut rounds.rounds_survived, 1);
            }
        }

        let multi = &mut rounds.multi_kills;
        match round.kills {
            0 | 1 => {}
            2 => bump(&mut multi.two, 1),
            3 => bump(&mut multi.three, 1),
            4 => bump(&mut multi.four, 1),
            _ => bump(&mut multi.five, 1),
        }

        self.round = RoundScratch::default();
        self.dirty = true;
    }

    /// Mutable counters for callers that restore state from elsewhere
    /// (tests, replays). Marks the aggregate dirty.
    pub const fn counters_mut(&mut self) -> &mut StatCounters {
        self.dirty = true;
        &mut self.counters
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn kill(weapon: &str, headshot: bool) -> Fact {
        Fact::Kill {
            weapon: weapon.to_owned(),
            headshot,
            first_of_round: false,
            trade: false,
        }
    }

    #[test]
    fn new_aggregate_is_dirty_and_empty() {
        let agg = Aggregate::new(ParticipantId(1), "alpha");
        assert!(agg.is_dirty());
        assert_eq!(agg.counters(), &StatCounters::default());
        assert!(agg.round().alive);
    }

    #[test]
    fn kill_updates_combat_and_weapon_lines() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&kill("ak47", true));
        agg.apply(&kill("awp", false));
        agg.apply(&kill("ak47", false));

        let c = agg.counters();
        assert_eq!(c.combat.kills, 3);
        assert_eq!(c.combat.headshots, 1);
        assert_eq!(c.weapons.len(), 2);
        assert_eq!(c.weapons.first().map(|l| l.weapon.as_str()), Some("ak47"));
        assert_eq!(c.weapon("ak47").map(|w| w.kills), Some(2));
        assert_eq!(c.weapon("ak47").map(|w| w.headshots), Some(1));
        assert_eq!(agg.round().kills, 3);
    }

    #[test]
    fn rename_only_dirties_on_change() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.clear_dirty();
        assert!(!agg.rename("alpha"));
        assert!(!agg.is_dirty());
        assert!(agg.rename("bravo"));
        assert!(agg.is_dirty());
        assert_eq!(agg.name(), "bravo");
    }

    #[test]
    fn close_round_folds_kast_and_multikills() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&kill("m4a1", false));
        agg.apply(&kill("m4a1", false));
        agg.apply(&kill("m4a1", false));
        agg.close_round(true);

        let r = &agg.counters().rounds;
        assert_eq!(r.rounds_played, 1);
        assert_eq!(r.rounds_won, 1);
        assert_eq!(r.kast_rounds, 1);
        assert_eq!(r.rounds_survived, 1);
        assert_eq!(r.multi_kills.three, 1);
        assert_eq!(agg.round(), &RoundScratch::default());
    }

    #[test]
    fn death_without_contribution_is_not_kast() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&Fact::Death {
            first_of_round: true,
        });
        agg.close_round(false);

        let c = agg.counters();
        assert_eq!(c.rounds.rounds_played, 1);
        assert_eq!(c.rounds.rounds_won, 0);
        assert_eq!(c.rounds.kast_rounds, 0);
        assert_eq!(c.rounds.rounds_survived, 0);
        assert_eq!(c.combat.first_deaths, 1);
    }

    #[test]
    fn traded_death_counts_for_kast() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&Fact::Death {
            first_of_round: false,
        });
        agg.apply(&Fact::Traded);
        agg.close_round(false);
        assert_eq!(agg.counters().rounds.kast_rounds, 1);
        assert_eq!(agg.counters().combat.traded_deaths, 1);
    }

    #[test]
    fn ace_bucket_catches_five_or_more() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        for _ in 0..6 {
            agg.apply(&kill("deagle", true));
        }
        agg.close_round(true);
        assert_eq!(agg.counters().rounds.multi_kills.five, 1);
    }

    #[test]
    fn utility_damage_counts_toward_both_totals() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&Fact::DamageDealt {
            weapon: "hegrenade".to_owned(),
            amount: 57,
            utility: true,
        });
        let c = agg.counters();
        assert_eq!(c.combat.damage_dealt, 57);
        assert_eq!(c.utility.utility_damage, 57);
        assert_eq!(c.weapon("hegrenade").map(|w| w.damage), Some(57));
    }

    #[test]
    fn grenade_kinds_route_to_their_counters() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.apply(&Fact::GrenadeThrown {
            grenade: GrenadeKind::He,
        });
        agg.apply(&Fact::GrenadeThrown {
            grenade: GrenadeKind::Molotov,
        });
        agg.apply(&Fact::GrenadeEffective {
            grenade: GrenadeKind::Molotov,
        });
        agg.apply(&Fact::GrenadeEffective {
            grenade: GrenadeKind::Decoy,
        });
        let u = &agg.counters().utility;
        assert_eq!(u.damaging_grenades_thrown(), 2);
        assert_eq!(u.effective_grenades, 1);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.counters_mut().combat.damage_taken = u32::MAX - 10;
        agg.apply(&Fact::DamageTaken { amount: 100 });
        assert_eq!(agg.counters().combat.damage_taken, u32::MAX);
    }

    #[test]
    fn saturated_rounds_keep_won_within_played() {
        let mut agg = Aggregate::new(ParticipantId(1), "alpha");
        agg.counters_mut().rounds.rounds_played = u32::MAX;
        agg.counters_mut().rounds.rounds_won = u32::MAX - 1;
        agg.close_round(true);
        let r = &agg.counters().rounds;
        assert!(r.rounds_won <= r.rounds_played);
    }
}
