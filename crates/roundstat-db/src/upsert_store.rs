//! Idempotent keyed bulk upserts.
//!
//! Every write follows the same shape: the batch is serialized to one JSONB
//! array, expanded server-side with `jsonb_to_recordset` into a staging
//! relation, and merged with a single `INSERT ... ON CONFLICT DO UPDATE`.
//! One round-trip per table regardless of batch size.
//!
//! Each merge is guarded by a timestamp column (`captured_at` for stats,
//! `occurred_at` for lifecycle events): a row only replaces the stored one
//! if it is at least as new. Replaying a batch is a no-op and two batches
//! landing out of order converge to the newest snapshot.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use roundstat_types::{MatchEvent, RoundEvent, Snapshot};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Column name and `PostgreSQL` type, in staging order.
pub type Column = (&'static str, &'static str);

/// Columns of `participant_stats`.
pub const STAT_COLUMNS: &[Column] = &[
    ("participant_id", "BIGINT"),
    ("snapshot_id", "UUID"),
    ("name", "TEXT"),
    ("match_key", "TEXT"),
    ("round_number", "BIGINT"),
    ("captured_at", "TIMESTAMPTZ"),
    ("kills", "BIGINT"),
    ("deaths", "BIGINT"),
    ("assists", "BIGINT"),
    ("flash_assists", "BIGINT"),
    ("headshots", "BIGINT"),
    ("damage_dealt", "BIGINT"),
    ("damage_taken", "BIGINT"),
    ("shots_fired", "BIGINT"),
    ("shots_hit", "BIGINT"),
    ("first_kills", "BIGINT"),
    ("first_deaths", "BIGINT"),
    ("trade_kills", "BIGINT"),
    ("trade_opportunities", "BIGINT"),
    ("traded_deaths", "BIGINT"),
    ("rounds_played", "BIGINT"),
    ("rounds_won", "BIGINT"),
    ("kast_rounds", "BIGINT"),
    ("rounds_survived", "BIGINT"),
    ("mvps", "BIGINT"),
    ("clutch_wins", "BIGINT"),
    ("clutch_losses", "BIGINT"),
    ("multi_kills_2k", "BIGINT"),
    ("multi_kills_3k", "BIGINT"),
    ("multi_kills_4k", "BIGINT"),
    ("multi_kills_5k", "BIGINT"),
    ("money_spent", "BIGINT"),
    ("money_earned", "BIGINT"),
    ("items_purchased", "BIGINT"),
    ("flashes_thrown", "BIGINT"),
    ("smokes_thrown", "BIGINT"),
    ("he_grenades_thrown", "BIGINT"),
    ("molotovs_thrown", "BIGINT"),
    ("decoys_thrown", "BIGINT"),
    ("effective_flashes", "BIGINT"),
    ("effective_smokes", "BIGINT"),
    ("effective_grenades", "BIGINT"),
    ("enemies_flashed", "BIGINT"),
    ("blind_duration_ms", "BIGINT"),
    ("utility_damage", "BIGINT"),
    ("bomb_plants", "BIGINT"),
    ("bomb_defuses", "BIGINT"),
    ("kd_ratio", "DOUBLE PRECISION"),
    ("headshot_percentage", "DOUBLE PRECISION"),
    ("accuracy_percentage", "DOUBLE PRECISION"),
    ("kast_percentage", "DOUBLE PRECISION"),
    ("adr", "DOUBLE PRECISION"),
    ("survival_rating", "DOUBLE PRECISION"),
    ("impact_rating", "DOUBLE PRECISION"),
    ("composite_rating", "DOUBLE PRECISION"),
    ("utility_score", "DOUBLE PRECISION"),
    ("performance_score", "DOUBLE PRECISION"),
    ("clutch_success_rate", "DOUBLE PRECISION"),
    ("trade_kill_rate", "DOUBLE PRECISION"),
    ("opening_kill_rate", "DOUBLE PRECISION"),
    ("grenade_effectiveness", "DOUBLE PRECISION"),
    ("flash_effectiveness", "DOUBLE PRECISION"),
    ("rank", "TEXT"),
    ("top_weapon", "TEXT"),
];

/// Columns of `participant_weapon_stats`.
pub const WEAPON_COLUMNS: &[Column] = &[
    ("participant_id", "BIGINT"),
    ("weapon", "TEXT"),
    ("kills", "BIGINT"),
    ("headshots", "BIGINT"),
    ("shots", "BIGINT"),
    ("hits", "BIGINT"),
    ("damage", "BIGINT"),
    ("captured_at", "TIMESTAMPTZ"),
];

/// Columns of `participant_round_history`.
pub const HISTORY_COLUMNS: &[Column] = &[
    ("match_key", "TEXT"),
    ("round_number", "BIGINT"),
    ("participant_id", "BIGINT"),
    ("snapshot_id", "UUID"),
    ("name", "TEXT"),
    ("kills", "BIGINT"),
    ("deaths", "BIGINT"),
    ("assists", "BIGINT"),
    ("headshots", "BIGINT"),
    ("damage_dealt", "BIGINT"),
    ("rounds_played", "BIGINT"),
    ("rounds_won", "BIGINT"),
    ("kd_ratio", "DOUBLE PRECISION"),
    ("adr", "DOUBLE PRECISION"),
    ("kast_percentage", "DOUBLE PRECISION"),
    ("composite_rating", "DOUBLE PRECISION"),
    ("performance_score", "DOUBLE PRECISION"),
    ("rank", "TEXT"),
    ("captured_at", "TIMESTAMPTZ"),
];

/// Columns of `match_events`.
pub const MATCH_EVENT_COLUMNS: &[Column] = &[
    ("match_key", "TEXT"),
    ("kind", "TEXT"),
    ("map_name", "TEXT"),
    ("occurred_at", "TIMESTAMPTZ"),
];

/// Columns of `round_events`.
pub const ROUND_EVENT_COLUMNS: &[Column] = &[
    ("match_key", "TEXT"),
    ("round_number", "BIGINT"),
    ("winner", "TEXT"),
    ("reason", "TEXT"),
    ("occurred_at", "TIMESTAMPTZ"),
];

/// Build the staged merge statement for one table.
///
/// `$1` is the JSONB array of rows. Key columns are never updated; every
/// other column (and `updated_at`) is overwritten when `guard` on the
/// incoming row is at least as new as the stored one.
fn merge_sql(table: &str, columns: &[Column], key: &[&str], guard: &str) -> String {
    let names = columns
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let definitions = columns
        .iter()
        .map(|(name, ty)| format!("{name} {ty}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|(name, _)| !key.contains(name))
        .map(|(name, _)| format!("{name} = EXCLUDED.{name}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} AS t ({names}) \
         SELECT {names} FROM jsonb_to_recordset($1::jsonb) AS s({definitions}) \
         ON CONFLICT ({key}) DO UPDATE SET {updates}, updated_at = now() \
         WHERE t.{guard} <= EXCLUDED.{guard}",
        key = key.join(", "),
    )
}

static STATS_MERGE: LazyLock<String> =
    LazyLock::new(|| merge_sql("participant_stats", STAT_COLUMNS, &["participant_id"], "captured_at"));

static WEAPONS_MERGE: LazyLock<String> = LazyLock::new(|| {
    merge_sql(
        "participant_weapon_stats",
        WEAPON_COLUMNS,
        &["participant_id", "weapon"],
        "captured_at",
    )
});

static HISTORY_MERGE: LazyLock<String> = LazyLock::new(|| {
    merge_sql(
        "participant_round_history",
        HISTORY_COLUMNS,
        &["match_key", "round_number", "participant_id"],
        "captured_at",
    )
});

static MATCH_EVENTS_MERGE: LazyLock<String> = LazyLock::new(|| {
    merge_sql(
        "match_events",
        MATCH_EVENT_COLUMNS,
        &["match_key", "kind"],
        "occurred_at",
    )
});

static ROUND_EVENTS_MERGE: LazyLock<String> = LazyLock::new(|| {
    merge_sql(
        "round_events",
        ROUND_EVENT_COLUMNS,
        &["match_key", "round_number"],
        "occurred_at",
    )
});

/// Collapse rows sharing a key to the last occurrence, keeping the position
/// of the first. A single `ON CONFLICT DO UPDATE` may not touch a row twice.
pub fn dedupe_last<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match positions.entry(key(&row)) {
            Entry::Occupied(pos) => {
                if let Some(slot) = out.get_mut(*pos.get()) {
                    *slot = row;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Rows affected by one snapshot batch, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows inserted or updated in `participant_stats`.
    pub stats: u64,
    /// Rows inserted or updated in `participant_weapon_stats`.
    pub weapons: u64,
    /// Rows inserted or updated in `participant_round_history`.
    pub history: u64,
}

impl UpsertSummary {
    /// Total rows touched across all tables.
    pub const fn total(&self) -> u64 {
        self.stats
            .saturating_add(self.weapons)
            .saturating_add(self.history)
    }
}

/// Operations on the stats and lifecycle tables.
pub struct UpsertStore<'a> {
    pool: &'a PgPool,
}

impl<'a> UpsertStore<'a> {
    /// Create a new upsert store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Participant Stats
    // =========================================================================

    /// Upsert a batch of snapshots into the stats, weapon and round history
    /// tables inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if staging fails, or
    /// [`DbError::Postgres`] if any statement fails (nothing is committed).
    pub async fn upsert_snapshots(&self, snapshots: &[Snapshot]) -> Result<UpsertSummary, DbError> {
        if snapshots.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let stats = dedupe_last(
            snapshots.iter().map(StatRow::from_snapshot).collect(),
            |row| row.participant_id,
        );
        let weapons = dedupe_last(
            snapshots.iter().flat_map(WeaponRow::from_snapshot).collect(),
            |row| (row.participant_id, row.weapon.clone()),
        );
        let history = dedupe_last(
            snapshots.iter().filter_map(HistoryRow::from_snapshot).collect(),
            |row| (row.match_key.clone(), row.round_number, row.participant_id),
        );

        let mut tx = self.pool.begin().await?;
        let summary = UpsertSummary {
            stats: merge(&mut tx, &STATS_MERGE, &stats).await?,
            weapons: merge(&mut tx, &WEAPONS_MERGE, &weapons).await?,
            history: merge(&mut tx, &HISTORY_MERGE, &history).await?,
        };
        tx.commit().await?;

        tracing::debug!(
            snapshots = snapshots.len(),
            stats = summary.stats,
            weapons = summary.weapons,
            history = summary.history,
            "Upserted participant snapshots"
        );
        Ok(summary)
    }

    /// Query the stored stats row for a participant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_participant_stats(
        &self,
        participant_id: i64,
    ) -> Result<Option<StatRow>, DbError> {
        let sql = format!(
            "SELECT {} FROM participant_stats WHERE participant_id = $1",
            column_list(STAT_COLUMNS)
        );
        let row = sqlx::query_as::<_, StatRow>(&sql)
            .bind(participant_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    /// Query the weapon breakdown for a participant, ordered by weapon.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_weapon_stats(&self, participant_id: i64) -> Result<Vec<WeaponRow>, DbError> {
        let sql = format!(
            "SELECT {} FROM participant_weapon_stats WHERE participant_id = $1 ORDER BY weapon",
            column_list(WEAPON_COLUMNS)
        );
        let rows = sqlx::query_as::<_, WeaponRow>(&sql)
            .bind(participant_id)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    /// Query the per-round history of a match.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_round_history(&self, match_key: &str) -> Result<Vec<HistoryRow>, DbError> {
        let sql = format!(
            "SELECT {} FROM participant_round_history WHERE match_key = $1 \
             ORDER BY round_number, participant_id",
            column_list(HISTORY_COLUMNS)
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(match_key)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    // =========================================================================
    // Lifecycle Events
    // =========================================================================

    /// Upsert match lifecycle events.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn upsert_match_events(&self, events: &[MatchEvent]) -> Result<u64, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows = dedupe_last(
            events.iter().map(MatchEventRow::from_event).collect(),
            |row| (row.match_key.clone(), row.kind.clone()),
        );
        let mut conn = self.pool.acquire().await?;
        let affected = merge(&mut conn, &MATCH_EVENTS_MERGE, &rows).await?;
        tracing::debug!(count = events.len(), affected, "Upserted match events");
        Ok(affected)
    }

    /// Upsert round lifecycle events.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn upsert_round_events(&self, events: &[RoundEvent]) -> Result<u64, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows = dedupe_last(
            events.iter().map(RoundEventRow::from_event).collect(),
            |row| (row.match_key.clone(), row.round_number),
        );
        let mut conn = self.pool.acquire().await?;
        let affected = merge(&mut conn, &ROUND_EVENTS_MERGE, &rows).await?;
        tracing::debug!(count = events.len(), affected, "Upserted round events");
        Ok(affected)
    }

    /// Query the lifecycle events of a match.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_match_events(&self, match_key: &str) -> Result<Vec<MatchEventRow>, DbError> {
        let rows = sqlx::query_as::<_, MatchEventRow>(
            r"SELECT match_key, kind, map_name, occurred_at
              FROM match_events
              WHERE match_key = $1
              ORDER BY occurred_at",
        )
        .bind(match_key)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Query the finished rounds of a match.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_round_events(&self, match_key: &str) -> Result<Vec<RoundEventRow>, DbError> {
        let rows = sqlx::query_as::<_, RoundEventRow>(
            r"SELECT match_key, round_number, winner, reason, occurred_at
              FROM round_events
              WHERE match_key = $1
              ORDER BY round_number",
        )
        .bind(match_key)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stage `rows` as one JSONB array and run the merge statement.
async fn merge<R: Serialize + Sync>(
    conn: &mut sqlx::PgConnection,
    sql: &str,
    rows: &[R],
) -> Result<u64, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let staged = serde_json::to_value(rows)?;
    let result = sqlx::query(sql).bind(staged).execute(conn).await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Rows
// =============================================================================

/// A row of `participant_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StatRow {
    /// Participant id (bit-cast to signed).
    pub participant_id: i64,
    /// Snapshot that produced the row.
    pub snapshot_id: Uuid,
    /// Display name.
    pub name: String,
    /// Match key of the snapshot context.
    pub match_key: Option<String>,
    /// Round number of the snapshot context.
    pub round_number: Option<i64>,
    /// Capture time; newer rows win.
    pub captured_at: DateTime<Utc>,
    /// Kills.
    pub kills: i64,
    /// Deaths.
    pub deaths: i64,
    /// Assists.
    pub assists: i64,
    /// Flash assists.
    pub flash_assists: i64,
    /// Headshot kills.
    pub headshots: i64,
    /// Damage dealt.
    pub damage_dealt: i64,
    /// Damage taken.
    pub damage_taken: i64,
    /// Shots fired.
    pub shots_fired: i64,
    /// Shots hit.
    pub shots_hit: i64,
    /// Opening kills.
    pub first_kills: i64,
    /// Opening deaths.
    pub first_deaths: i64,
    /// Trade kills.
    pub trade_kills: i64,
    /// Trade opportunities.
    pub trade_opportunities: i64,
    /// Deaths that were traded.
    pub traded_deaths: i64,
    /// Rounds played.
    pub rounds_played: i64,
    /// Rounds won.
    pub rounds_won: i64,
    /// KAST rounds.
    pub kast_rounds: i64,
    /// Rounds survived.
    pub rounds_survived: i64,
    /// MVP awards.
    pub mvps: i64,
    /// Clutches won.
    pub clutch_wins: i64,
    /// Clutches lost.
    pub clutch_losses: i64,
    /// 2-kill rounds.
    pub multi_kills_2k: i64,
    /// 3-kill rounds.
    pub multi_kills_3k: i64,
    /// 4-kill rounds.
    pub multi_kills_4k: i64,
    /// 5-kill rounds.
    pub multi_kills_5k: i64,
    /// Money spent.
    pub money_spent: i64,
    /// Money earned.
    pub money_earned: i64,
    /// Items purchased.
    pub items_purchased: i64,
    /// Flashbangs thrown.
    pub flashes_thrown: i64,
    /// Smokes thrown.
    pub smokes_thrown: i64,
    /// HE grenades thrown.
    pub he_grenades_thrown: i64,
    /// Molotovs thrown.
    pub molotovs_thrown: i64,
    /// Decoys thrown.
    pub decoys_thrown: i64,
    /// Effective flashbangs.
    pub effective_flashes: i64,
    /// Effective smokes.
    pub effective_smokes: i64,
    /// Effective HE grenades and molotovs.
    pub effective_grenades: i64,
    /// Opponents blinded.
    pub enemies_flashed: i64,
    /// Total blind time in milliseconds.
    pub blind_duration_ms: i64,
    /// Utility damage.
    pub utility_damage: i64,
    /// Bombs planted.
    pub bomb_plants: i64,
    /// Bombs defused.
    pub bomb_defuses: i64,
    /// Kill/death ratio.
    pub kd_ratio: f64,
    /// Headshot percentage.
    pub headshot_percentage: f64,
    /// Accuracy percentage.
    pub accuracy_percentage: f64,
    /// KAST percentage.
    pub kast_percentage: f64,
    /// Average damage per round.
    pub adr: f64,
    /// Survival rating.
    pub survival_rating: f64,
    /// Impact rating.
    pub impact_rating: f64,
    /// Composite rating.
    pub composite_rating: f64,
    /// Utility score.
    pub utility_score: f64,
    /// Performance score.
    pub performance_score: f64,
    /// Clutch success rate.
    pub clutch_success_rate: f64,
    /// Trade kill rate.
    pub trade_kill_rate: f64,
    /// Opening kill rate.
    pub opening_kill_rate: f64,
    /// Grenade effectiveness.
    pub grenade_effectiveness: f64,
    /// Flash effectiveness.
    pub flash_effectiveness: f64,
    /// Rank label.
    pub rank: String,
    /// Weapon with the most kills.
    pub top_weapon: Option<String>,
}

impl StatRow {
    /// Flatten a snapshot into a stats row.
    pub fn from_snapshot(s: &Snapshot) -> Self {
        let c = &s.counters;
        let m = &s.metrics;
        Self {
            participant_id: s.participant_id.as_db_key(),
            snapshot_id: s.id.into_inner(),
            name: s.name.clone(),
            match_key: s.context.as_ref().map(|ctx| ctx.match_key.clone()),
            round_number: s.round().map(i64::from),
            captured_at: s.captured_at,
            kills: i64::from(c.combat.kills),
            deaths: i64::from(c.combat.deaths),
            assists: i64::from(c.combat.assists),
            flash_assists: i64::from(c.combat.flash_assists),
            headshots: i64::from(c.combat.headshots),
            damage_dealt: i64::from(c.combat.damage_dealt),
            damage_taken: i64::from(c.combat.damage_taken),
            shots_fired: i64::from(c.combat.shots_fired),
            shots_hit: i64::from(c.combat.shots_hit),
            first_kills: i64::from(c.combat.first_kills),
            first_deaths: i64::from(c.combat.first_deaths),
            trade_kills: i64::from(c.combat.trade_kills),
            trade_opportunities: i64::from(c.combat.trade_opportunities),
            traded_deaths: i64::from(c.combat.traded_deaths),
            rounds_played: i64::from(c.rounds.rounds_played),
            rounds_won: i64::from(c.rounds.rounds_won),
            kast_rounds: i64::from(c.rounds.kast_rounds),
            rounds_survived: i64::from(c.rounds.rounds_survived),
            mvps: i64::from(c.rounds.mvps),
            clutch_wins: i64::from(c.rounds.clutch_wins),
            clutch_losses: i64::from(c.rounds.clutch_losses),
            multi_kills_2k: i64::from(c.rounds.multi_kills.two),
            multi_kills_3k: i64::from(c.rounds.multi_kills.three),
            multi_kills_4k: i64::from(c.rounds.multi_kills.four),
            multi_kills_5k: i64::from(c.rounds.multi_kills.five),
            money_spent: i64::from(c.economy.money_spent),
            money_earned: i64::from(c.economy.money_earned),
            items_purchased: i64::from(c.economy.items_purchased),
            flashes_thrown: i64::from(c.utility.flashes_thrown),
            smokes_thrown: i64::from(c.utility.smokes_thrown),
            he_grenades_thrown: i64::from(c.utility.he_grenades_thrown),
            molotovs_thrown: i64::from(c.utility.molotovs_thrown),
            decoys_thrown: i64::from(c.utility.decoys_thrown),
            effective_flashes: i64::from(c.utility.effective_flashes),
            effective_smokes: i64::from(c.utility.effective_smokes),
            effective_grenades: i64::from(c.utility.effective_grenades),
            enemies_flashed: i64::from(c.utility.enemies_flashed),
            blind_duration_ms: i64::from(c.utility.blind_duration_ms),
            utility_damage: i64::from(c.utility.utility_damage),
            bomb_plants: i64::from(c.objective.bomb_plants),
            bomb_defuses: i64::from(c.objective.bomb_defuses),
            kd_ratio: m.kd_ratio,
            headshot_percentage: m.headshot_percentage,
            accuracy_percentage: m.accuracy_percentage,
            kast_percentage: m.kast_percentage,
            adr: m.adr,
            survival_rating: m.survival_rating,
            impact_rating: m.impact_rating,
            composite_rating: m.composite_rating,
            utility_score: m.utility_score,
            performance_score: m.performance_score,
            clutch_success_rate: m.clutch_success_rate,
            trade_kill_rate: m.trade_kill_rate,
            opening_kill_rate: m.opening_kill_rate,
            grenade_effectiveness: m.grenade_effectiveness,
            flash_effectiveness: m.flash_effectiveness,
            rank: m.rank.as_str().to_owned(),
            top_weapon: m.top_weapon.clone(),
        }
    }
}

/// A row of `participant_weapon_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct WeaponRow {
    /// Participant id.
    pub participant_id: i64,
    /// Weapon class name.
    pub weapon: String,
    /// Kills.
    pub kills: i64,
    /// Headshot kills.
    pub headshots: i64,
    /// Shots fired.
    pub shots: i64,
    /// Shots hit.
    pub hits: i64,
    /// Damage dealt.
    pub damage: i64,
    /// Capture time of the snapshot.
    pub captured_at: DateTime<Utc>,
}

impl WeaponRow {
    /// One row per weapon line of the snapshot.
    pub fn from_snapshot(s: &Snapshot) -> Vec<Self> {
        s.counters
            .weapons
            .iter()
            .map(|line| Self {
                participant_id: s.participant_id.as_db_key(),
                weapon: line.weapon.clone(),
                kills: i64::from(line.stats.kills),
                headshots: i64::from(line.stats.headshots),
                shots: i64::from(line.stats.shots),
                hits: i64::from(line.stats.hits),
                damage: i64::from(line.stats.damage),
                captured_at: s.captured_at,
            })
            .collect()
    }
}

/// A row of `participant_round_history`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HistoryRow {
    /// Match key.
    pub match_key: String,
    /// Round number.
    pub round_number: i64,
    /// Participant id.
    pub participant_id: i64,
    /// Snapshot that produced the row.
    pub snapshot_id: Uuid,
    /// Display name.
    pub name: String,
    /// Kills so far.
    pub kills: i64,
    /// Deaths so far.
    pub deaths: i64,
    /// Assists so far.
    pub assists: i64,
    /// Headshot kills so far.
    pub headshots: i64,
    /// Damage dealt so far.
    pub damage_dealt: i64,
    /// Rounds played so far.
    pub rounds_played: i64,
    /// Rounds won so far.
    pub rounds_won: i64,
    /// Kill/death ratio.
    pub kd_ratio: f64,
    /// Average damage per round.
    pub adr: f64,
    /// KAST percentage.
    pub kast_percentage: f64,
    /// Composite rating.
    pub composite_rating: f64,
    /// Performance score.
    pub performance_score: f64,
    /// Rank label.
    pub rank: String,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}

impl HistoryRow {
    /// History row for a snapshot tagged with a round, `None` otherwise.
    pub fn from_snapshot(s: &Snapshot) -> Option<Self> {
        let ctx = s.context.as_ref()?;
        let round = ctx.round?;
        let c = &s.counters;
        let m = &s.metrics;
        Some(Self {
            match_key: ctx.match_key.clone(),
            round_number: i64::from(round),
            participant_id: s.participant_id.as_db_key(),
            snapshot_id: s.id.into_inner(),
            name: s.name.clone(),
            kills: i64::from(c.combat.kills),
            deaths: i64::from(c.combat.deaths),
            assists: i64::from(c.combat.assists),
            headshots: i64::from(c.combat.headshots),
            damage_dealt: i64::from(c.combat.damage_dealt),
            rounds_played: i64::from(c.rounds.rounds_played),
            rounds_won: i64::from(c.rounds.rounds_won),
            kd_ratio: m.kd_ratio,
            adr: m.adr,
            kast_percentage: m.kast_percentage,
            composite_rating: m.composite_rating,
            performance_score: m.performance_score,
            rank: m.rank.as_str().to_owned(),
            captured_at: s.captured_at,
        })
    }
}

/// A row of `match_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MatchEventRow {
    /// Match key.
    pub match_key: String,
    /// `started` or `ended`.
    pub kind: String,
    /// Map name.
    pub map_name: Option<String>,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
}

impl MatchEventRow {
    /// Flatten a match event.
    pub fn from_event(e: &MatchEvent) -> Self {
        Self {
            match_key: e.match_key.clone(),
            kind: e.kind.as_str().to_owned(),
            map_name: e.map_name.clone(),
            occurred_at: e.occurred_at,
        }
    }
}

/// A row of `round_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RoundEventRow {
    /// Match key.
    pub match_key: String,
    /// Round number.
    pub round_number: i64,
    /// Winning side.
    pub winner: Option<String>,
    /// End reason.
    pub reason: Option<String>,
    /// When the round ended.
    pub occurred_at: DateTime<Utc>,
}

impl RoundEventRow {
    /// Flatten a round event.
    pub fn from_event(e: &RoundEvent) -> Self {
        Self {
            match_key: e.match_key.clone(),
            round_number: i64::from(e.round),
            winner: e.winner.clone(),
            reason: e.reason.clone(),
            occurred_at: e.occurred_at,
        }
    }
}
