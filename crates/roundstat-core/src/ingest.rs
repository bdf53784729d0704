//! Applying validated facts to the session store.
//!
//! This is the boundary where typed facts enter the core. Invalid facts are
//! rejected here with a `warn!` and never reach an aggregate.

use roundstat_types::{Fact, FactError, ParticipantId};

use crate::session::SessionStore;

/// Validate `fact` and apply it to the participant's aggregate.
///
/// Returns `Ok(false)` when the participant is not tracked.
///
/// # Errors
///
/// Returns the [`FactError`] when validation fails; nothing is applied.
pub fn apply_fact(
    store: &SessionStore,
    participant: ParticipantId,
    fact: &Fact,
) -> Result<bool, FactError> {
    if let Err(e) = fact.validate() {
        tracing::warn!(
            participant = %participant,
            fact = fact.label(),
            error = %e,
            "rejected invalid fact"
        );
        return Err(e);
    }

    let applied = store.mutate(participant, |aggregate| aggregate.apply(fact));
    if !applied {
        tracing::debug!(
            participant = %participant,
            fact = fact.label(),
            "fact for unknown participant ignored"
        );
    }
    Ok(applied)
}

/// A kill as reported by the event-translation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillReport {
    /// Participant credited with the kill.
    pub killer: ParticipantId,
    /// Participant who died.
    pub victim: ParticipantId,
    /// Participant credited with an assist, and whether it was a flash assist.
    pub assister: Option<(ParticipantId, bool)>,
    /// Weapon class name.
    pub weapon: String,
    /// Headshot kill.
    pub headshot: bool,
    /// First kill of the round.
    pub first_of_round: bool,
    /// The kill avenged a teammate; the teammate's death counts as traded.
    pub traded_teammate: Option<ParticipantId>,
}

/// Apply every fact implied by one kill: the kill, the death, the assist and
/// the trade. A self-kill or team-kill with `killer == victim` only counts
/// the death.
///
/// # Errors
///
/// Returns the [`FactError`] when the weapon name is invalid; nothing is
/// applied.
pub fn record_kill(store: &SessionStore, report: &KillReport) -> Result<(), FactError> {
    let kill = Fact::Kill {
        weapon: report.weapon.clone(),
        headshot: report.headshot,
        first_of_round: report.first_of_round,
        trade: report.traded_teammate.is_some(),
    };
    kill.validate()?;

    if report.killer != report.victim {
        apply_fact(store, report.killer, &kill)?;
    }
    apply_fact(
        store,
        report.victim,
        &Fact::Death {
            first_of_round: report.first_of_round,
        },
    )?;
    if let Some((assister, flash)) = report.assister {
        apply_fact(store, assister, &Fact::Assist { flash })?;
    }
    if let Some(teammate) = report.traded_teammate {
        apply_fact(store, teammate, &Fact::Traded)?;
    }
    Ok(())
}

/// Reset every participant's round flags at round start.
pub fn begin_round(store: &SessionStore) {
    store.for_each(|aggregate| aggregate.begin_round());
}

/// Fold the finished round into every participant. Participants listed in
/// `winners` are credited with the win.
pub fn close_round(store: &SessionStore, winners: &[ParticipantId]) {
    store.for_each(|aggregate| {
        let won = winners.contains(&aggregate.id());
        aggregate.close_round(won);
    });
    tracing::debug!(
        participants = store.len(),
        winners = winners.len(),
        "round folded"
    );
}
