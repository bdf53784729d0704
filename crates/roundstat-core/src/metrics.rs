//! Derived performance metrics.
//!
//! Everything here is a pure function of a participant's counters. The
//! weights are the published constants third-party rating tools compare
//! against, so they are reproduced exactly and the three ratings
//! (composite, impact, performance) stay separate outputs even where their
//! inputs overlap.
//!
//! Every division is guarded: a zero denominator yields `0.0`, never NaN or
//! infinity.
//!
//! | Metric | Formula |
//! |--------|---------|
//! | KD | kills / deaths, or kills when deathless |
//! | ADR | damage dealt / rounds |
//! | Survival | ((rounds - deaths) / rounds) * 0.154 |
//! | Impact | min(2.0, multi-kills + clutches * 0.2 + opening kills * 0.15 + MVPs * 0.05) |
//! | Composite | max(0, KPR * 0.6 + (0.7 - DPR * 0.5) + impact * 0.3 + KAST ratio * 0.2 + survival) |
//! | Performance | capped KD, ADR, KAST, MVP and impact terms summing to at most 100 |

use chrono::{DateTime, Utc};
use roundstat_types::{
    Aggregate, DerivedMetrics, MatchContext, Rank, Snapshot, SnapshotId, StatCounters, WeaponLine,
};

/// Multiplier turning the survival ratio into its rating contribution.
pub const SURVIVAL_WEIGHT: f64 = 0.154;

/// Upper bound of the impact rating.
pub const IMPACT_CAP: f64 = 2.0;

/// Impact weight of a 2-kill round.
pub const DOUBLE_KILL_WEIGHT: f64 = 0.1;
/// Impact weight of a 3-kill round.
pub const TRIPLE_KILL_WEIGHT: f64 = 0.2;
/// Impact weight of a 4-kill round.
pub const QUAD_KILL_WEIGHT: f64 = 0.3;
/// Impact weight of a 5-kill round.
pub const ACE_WEIGHT: f64 = 0.5;
/// Impact weight of a won clutch.
pub const CLUTCH_WEIGHT: f64 = 0.2;
/// Impact weight of an opening kill.
pub const FIRST_KILL_WEIGHT: f64 = 0.15;
/// Impact weight of an MVP award.
pub const MVP_WEIGHT: f64 = 0.05;

/// Rank thresholds, highest first. A score equal to a threshold earns it.
const RANK_THRESHOLDS: [(f64, Rank); 9] = [
    (90.0, Rank::SPlus),
    (80.0, Rank::S),
    (70.0, Rank::APlus),
    (60.0, Rank::A),
    (50.0, Rank::BPlus),
    (40.0, Rank::B),
    (30.0, Rank::CPlus),
    (20.0, Rank::C),
    (10.0, Rank::D),
];

/// `num / den`, or zero when `den` is zero.
fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        return 0.0;
    }
    f64::from(num) / f64::from(den)
}

/// `num / den * 100`, or zero when `den` is zero.
fn percentage(num: u32, den: u32) -> f64 {
    if den == 0 {
        return 0.0;
    }
    f64::from(num) / f64::from(den) * 100.0
}

/// Kills per death; kills when the participant never died.
pub fn kd_ratio(c: &StatCounters) -> f64 {
    let kills = c.combat.kills;
    let deaths = c.combat.deaths;
    if deaths > 0 {
        f64::from(kills) / f64::from(deaths)
    } else {
        f64::from(kills)
    }
}

/// Average damage per completed round.
pub fn adr(c: &StatCounters) -> f64 {
    ratio(c.combat.damage_dealt, c.rounds.rounds_played)
}

/// Percentage of rounds with a kill, assist, survival or trade.
pub fn kast_percentage(c: &StatCounters) -> f64 {
    percentage(c.rounds.kast_rounds, c.rounds.rounds_played)
}

/// Survival contribution to the composite rating.
pub fn survival_rating(c: &StatCounters) -> f64 {
    let rounds = c.rounds.rounds_played;
    if rounds == 0 {
        return 0.0;
    }
    let rounds = f64::from(rounds);
    ((rounds - f64::from(c.combat.deaths)) / rounds) * SURVIVAL_WEIGHT
}

/// Multi-kill, clutch, opening-kill and MVP impact, capped at [`IMPACT_CAP`].
pub fn impact_rating(c: &StatCounters) -> f64 {
    if c.rounds.rounds_played == 0 {
        return 0.0;
    }
    let multi = &c.rounds.multi_kills;
    let multi_kill_points = f64::from(multi.two) * DOUBLE_KILL_WEIGHT
        + f64::from(multi.three) * TRIPLE_KILL_WEIGHT
        + f64::from(multi.four) * QUAD_KILL_WEIGHT
        + f64::from(multi.five) * ACE_WEIGHT;
    let impact = multi_kill_points
        + f64::from(c.rounds.clutch_wins) * CLUTCH_WEIGHT
        + f64::from(c.combat.first_kills) * FIRST_KILL_WEIGHT
        + f64::from(c.rounds.mvps) * MVP_WEIGHT;
    impact.min(IMPACT_CAP)
}

/// Per-round composite rating, floored at zero.
pub fn composite_rating(c: &StatCounters, impact: f64, survival: f64) -> f64 {
    let rounds = c.rounds.rounds_played;
    if rounds == 0 {
        return 0.0;
    }
    let kills_per_round = ratio(c.combat.kills, rounds);
    let deaths_per_round = ratio(c.combat.deaths, rounds);
    let kast_ratio = ratio(c.rounds.kast_rounds, rounds);
    let rating = kills_per_round * 0.6
        + (0.7 - deaths_per_round * 0.5)
        + impact * 0.3
        + kast_ratio * 0.2
        + survival;
    rating.max(0.0)
}

/// Utility damage, blind time and effective smokes per round.
pub fn utility_score(c: &StatCounters) -> f64 {
    let rounds = c.rounds.rounds_played;
    if rounds == 0 {
        return 0.0;
    }
    let rounds = f64::from(rounds);
    let u = &c.utility;
    (f64::from(u.utility_damage) / rounds) * 0.4
        + (f64::from(u.blind_duration_ms) / 1000.0 / rounds) * 0.4
        + (f64::from(u.effective_smokes) / rounds) * 0.2
}

/// Weighted 0-100 score built from capped KD, ADR, KAST, MVP and impact terms.
pub fn performance_score(c: &StatCounters, kd: f64, adr: f64, kast: f64, impact: f64) -> f64 {
    let mvp_term = if c.rounds.rounds_played > 0 {
        (f64::from(c.rounds.mvps) / f64::from(c.rounds.rounds_played) * 15.0).min(15.0)
    } else {
        0.0
    };
    (kd * 10.0).min(30.0)
        + (adr / 2.0).min(20.0)
        + (kast / 5.0).min(20.0)
        + mvp_term
        + (impact * 7.5).min(15.0)
}

/// Letter grade for a performance score.
pub fn rank_for(score: f64) -> Rank {
    RANK_THRESHOLDS
        .iter()
        .find(|(threshold, _)| score >= *threshold)
        .map_or(Rank::F, |(_, rank)| *rank)
}

/// Weapon with the most kills. Ties keep the weapon used first; weapons
/// without kills never qualify.
pub fn top_weapon(weapons: &[WeaponLine]) -> Option<&str> {
    let mut best: Option<&WeaponLine> = None;
    for line in weapons {
        if line.stats.kills == 0 {
            continue;
        }
        if best.is_none_or(|b| line.stats.kills > b.stats.kills) {
            best = Some(line);
        }
    }
    best.map(|line| line.weapon.as_str())
}

/// Derive every metric from a set of counters.
pub fn derive(c: &StatCounters) -> DerivedMetrics {
    let kd = kd_ratio(c);
    let adr = adr(c);
    let kast = kast_percentage(c);
    let survival = survival_rating(c);
    let impact = impact_rating(c);
    let composite = composite_rating(c, impact, survival);
    let performance = performance_score(c, kd, adr, kast, impact);

    DerivedMetrics {
        kd_ratio: kd,
        headshot_percentage: percentage(c.combat.headshots, c.combat.kills),
        accuracy_percentage: percentage(c.combat.shots_hit, c.combat.shots_fired),
        kast_percentage: kast,
        adr,
        survival_rating: survival,
        impact_rating: impact,
        composite_rating: composite,
        utility_score: utility_score(c),
        performance_score: performance,
        rank: rank_for(performance),
        clutch_success_rate: percentage(
            c.rounds.clutch_wins,
            c.rounds.clutch_wins.saturating_add(c.rounds.clutch_losses),
        ),
        trade_kill_rate: percentage(c.combat.trade_kills, c.combat.trade_opportunities),
        opening_kill_rate: percentage(
            c.combat.first_kills,
            c.combat.first_kills.saturating_add(c.combat.first_deaths),
        ),
        grenade_effectiveness: percentage(
            c.utility.effective_grenades,
            c.utility.damaging_grenades_thrown(),
        ),
        flash_effectiveness: percentage(c.utility.effective_flashes, c.utility.flashes_thrown),
        top_weapon: top_weapon(&c.weapons).map(ToOwned::to_owned),
    }
}

/// Build an immutable snapshot of an aggregate.
pub fn snapshot_of(
    aggregate: &Aggregate,
    context: Option<MatchContext>,
    captured_at: DateTime<Utc>,
) -> Snapshot {
    let counters = aggregate.counters().clone();
    let metrics = derive(&counters);
    Snapshot {
        id: SnapshotId::new(),
        participant_id: aggregate.id(),
        name: aggregate.name().to_owned(),
        counters,
        metrics,
        context,
        captured_at,
    }
}
