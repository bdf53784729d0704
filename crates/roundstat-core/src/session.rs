//! Concurrent per-participant aggregate store.
//!
//! The [`SessionStore`] maps participant ids to aggregates. The map itself is
//! a sharded [`DashMap`]; each aggregate sits behind its own
//! [`parking_lot::RwLock`], so mutations to different participants never
//! contend and a capture of one participant never blocks writers of another.
//!
//! Lock order is always shard first, then entity, and the shard guard is
//! dropped before the entity lock is taken. Removal empties the entity slot
//! under its write lock, so a caller still holding a handle to a removed
//! participant sees an empty slot instead of a live aggregate. Callbacks passed to
//! [`SessionStore::mutate`] and [`SessionStore::for_each`] run under the
//! entity's exclusive lock and must not block or call back into the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use roundstat_types::{Aggregate, MatchContext, ParticipantId, Snapshot};

use crate::clock::{Clock, SystemClock};
use crate::metrics;

/// Shared slot of one participant. `None` once the participant was removed.
type Handle = Arc<RwLock<Option<Aggregate>>>;

/// Misuse of the session store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Participant id 0 is reserved.
    #[error("participant id 0 is not a valid identity")]
    InvalidId,

    /// Participants need a display name.
    #[error("participant {0} has an empty name")]
    EmptyName(ParticipantId),
}

/// Registry of live aggregates for one session.
#[derive(Debug)]
pub struct SessionStore {
    entries: DashMap<ParticipantId, Handle>,
    clock: Arc<dyn Clock>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an empty store timestamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with a custom time source.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// The time source used for snapshots.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn handle(&self, id: ParticipantId) -> Option<Handle> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the participant's aggregate, creating it on first contact.
    ///
    /// A known participant whose name changed is renamed (and marked dirty);
    /// an unchanged name leaves the dirty flag alone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidId`] for id 0 and
    /// [`SessionError::EmptyName`] for a blank name.
    pub fn ensure(&self, id: ParticipantId, name: &str) -> Result<Aggregate, SessionError> {
        if !id.is_valid() {
            return Err(SessionError::InvalidId);
        }
        if name.trim().is_empty() {
            return Err(SessionError::EmptyName(id));
        }

        loop {
            let handle = Arc::clone(
                self.entries
                    .entry(id)
                    .or_insert_with(|| {
                        tracing::debug!(participant = %id, name, "participant joined");
                        Arc::new(RwLock::new(Some(Aggregate::new(id, name))))
                    })
                    .value(),
            );

            let mut slot = handle.write();
            // Emptied by a concurrent removal: join again as a new entry.
            let Some(aggregate) = slot.as_mut() else {
                continue;
            };
            if aggregate.rename(name) {
                tracing::debug!(participant = %id, name, "participant renamed");
            }
            return Ok(aggregate.clone());
        }
    }

    /// Copy of the participant's aggregate, if present.
    pub fn try_get(&self, id: ParticipantId) -> Option<Aggregate> {
        self.handle(id).and_then(|handle| handle.read().clone())
    }

    /// Apply `f` to the participant's aggregate under its exclusive lock and
    /// mark it dirty. Returns `false` when the participant is unknown or was
    /// removed before the lock was acquired.
    pub fn mutate<F>(&self, id: ParticipantId, f: F) -> bool
    where
        F: FnOnce(&mut Aggregate),
    {
        self.handle(id).is_some_and(|handle| apply(&handle, f))
    }

    /// Apply `f` to every aggregate, each under its own exclusive lock.
    ///
    /// Handles are collected up front, so participants added while this runs
    /// are not visited and no shard lock is held while `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&mut Aggregate),
    {
        for handle in self.handles() {
            apply(&handle, &mut f);
        }
    }

    fn handles(&self) -> Vec<Handle> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Capture snapshots of every aggregate, or only the dirty ones.
    ///
    /// With `only_dirty`, the dirty flag is cleared in the same critical
    /// section that read the counters: a mutation racing the capture is
    /// either in this snapshot or leaves the aggregate dirty for the next
    /// one. A full capture leaves every flag untouched.
    ///
    /// Snapshots are ordered by participant id.
    pub fn capture_snapshots(
        &self,
        only_dirty: bool,
        context: Option<&MatchContext>,
    ) -> Vec<Snapshot> {
        let captured_at = self.clock.now();
        let mut snapshots: Vec<Snapshot> = self
            .handles()
            .iter()
            .filter_map(|handle| capture_one(handle, only_dirty, context, captured_at))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.participant_id);
        snapshots
    }

    /// Remove the participant, returning its final state.
    ///
    /// The slot is emptied under its write lock: a mutation that already
    /// holds the lock lands in the returned state, and one that acquires it
    /// afterwards reports `false`.
    pub fn remove(&self, id: ParticipantId) -> Option<Aggregate> {
        let (_, handle) = self.entries.remove(&id)?;
        handle.write().take()
    }

    /// Remove the participant and return one last snapshot of it.
    ///
    /// The entry leaves the map before the snapshot is built, so no mutation
    /// can land between the final capture and removal.
    pub fn finalize(&self, id: ParticipantId, context: Option<&MatchContext>) -> Option<Snapshot> {
        let aggregate = self.remove(id)?;
        tracing::debug!(participant = %id, "participant finalized");
        Some(metrics::snapshot_of(
            &aggregate,
            context.cloned(),
            self.clock.now(),
        ))
    }

    /// Number of tracked participants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no participant is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked participant ids in ascending order.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Run `f` on a live slot and mark it dirty. `false` for an emptied slot.
fn apply<F>(handle: &Handle, f: F) -> bool
where
    F: FnOnce(&mut Aggregate),
{
    let mut slot = handle.write();
    let Some(aggregate) = slot.as_mut() else {
        return false;
    };
    f(aggregate);
    aggregate.mark_dirty();
    true
}

fn capture_one(
    handle: &Handle,
    only_dirty: bool,
    context: Option<&MatchContext>,
    captured_at: DateTime<Utc>,
) -> Option<Snapshot> {
    let guard = handle.upgradable_read();
    let aggregate = guard.as_ref()?;
    if only_dirty && !aggregate.is_dirty() {
        return None;
    }
    let snapshot = metrics::snapshot_of(aggregate, context.cloned(), captured_at);
    if only_dirty {
        let mut slot = RwLockUpgradableReadGuard::upgrade(guard);
        if let Some(aggregate) = slot.as_mut() {
            aggregate.clear_dirty();
        }
    }
    Some(snapshot)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeDelta;
    use roundstat_types::Fact;

    use super::*;
    use crate::clock::ManualClock;

    fn kill() -> Fact {
        Fact::Kill {
            weapon: "ak47".to_owned(),
            headshot: false,
            first_of_round: false,
            trade: false,
        }
    }

    #[test]
    fn ensure_rejects_invalid_identity() {
        let store = SessionStore::new();
        assert_eq!(
            store.ensure(ParticipantId(0), "zero"),
            Err(SessionError::InvalidId)
        );
        assert_eq!(
            store.ensure(ParticipantId(4), "  "),
            Err(SessionError::EmptyName(ParticipantId(4)))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn ensure_creates_dirty_then_returns_existing() {
        let store = SessionStore::new();
        let first = store.ensure(ParticipantId(1), "alpha").unwrap();
        assert!(first.is_dirty());

        store.mutate(ParticipantId(1), |agg| agg.apply(&kill()));
        let again = store.ensure(ParticipantId(1), "alpha").unwrap();
        assert_eq!(again.counters().combat.kills, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ensure_with_same_name_keeps_clean_aggregate_clean() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(1), "alpha").unwrap();
        assert_eq!(store.capture_snapshots(true, None).len(), 1);

        let same = store.ensure(ParticipantId(1), "alpha").unwrap();
        assert!(!same.is_dirty());

        let renamed = store.ensure(ParticipantId(1), "bravo").unwrap();
        assert!(renamed.is_dirty());
        assert_eq!(renamed.name(), "bravo");
    }

    #[test]
    fn mutate_unknown_participant_is_noop() {
        let store = SessionStore::new();
        assert!(!store.mutate(ParticipantId(7), |agg| agg.apply(&kill())));
        assert!(store.try_get(ParticipantId(7)).is_none());
    }

    #[test]
    fn dirty_capture_is_exact() {
        let store = SessionStore::new();
        for id in 1..=3 {
            store.ensure(ParticipantId(id), "p").unwrap();
        }
        assert_eq!(store.capture_snapshots(true, None).len(), 3);
        assert!(store.capture_snapshots(true, None).is_empty());

        store.mutate(ParticipantId(2), |agg| agg.apply(&kill()));
        let snaps = store.capture_snapshots(true, None);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps.first().map(|s| s.participant_id), Some(ParticipantId(2)));
        assert!(store.capture_snapshots(true, None).is_empty());
    }

    #[test]
    fn full_capture_keeps_dirty_flags() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(1), "p").unwrap();
        assert_eq!(store.capture_snapshots(false, None).len(), 1);
        assert_eq!(store.capture_snapshots(false, None).len(), 1);
        assert_eq!(store.capture_snapshots(true, None).len(), 1);
        assert_eq!(store.capture_snapshots(false, None).len(), 1);
    }

    #[test]
    fn capture_is_ordered_and_tagged() {
        let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000);
        let clock = Arc::new(ManualClock::new(start));
        let store = SessionStore::with_clock(clock);
        for id in [9, 2, 5] {
            store.ensure(ParticipantId(id), "p").unwrap();
        }
        let ctx = MatchContext::for_round("m-1", 3);
        let snaps = store.capture_snapshots(false, Some(&ctx));
        let ids: Vec<u64> = snaps.iter().map(|s| s.participant_id.into_inner()).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert!(snaps.iter().all(|s| s.context.as_ref() == Some(&ctx)));
        assert!(snaps.iter().all(|s| s.captured_at == start));
    }

    #[test]
    fn for_each_visits_every_participant() {
        let store = SessionStore::new();
        for id in 1..=4 {
            store.ensure(ParticipantId(id), "p").unwrap();
        }
        store.capture_snapshots(true, None);

        let mut visited = 0;
        store.for_each(|agg| {
            agg.close_round(true);
            visited += 1;
        });
        assert_eq!(visited, 4);
        assert_eq!(store.capture_snapshots(true, None).len(), 4);
        assert_eq!(
            store
                .try_get(ParticipantId(3))
                .map(|a| a.counters().rounds.rounds_won),
            Some(1)
        );
    }

    #[test]
    fn remove_returns_final_state() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(1), "p").unwrap();
        store.mutate(ParticipantId(1), |agg| agg.apply(&kill()));
        let removed = store.remove(ParticipantId(1)).unwrap();
        assert_eq!(removed.counters().combat.kills, 1);
        assert!(store.remove(ParticipantId(1)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn finalize_snapshots_then_removes() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(8), "eight").unwrap();
        store.mutate(ParticipantId(8), |agg| agg.apply(&kill()));
        let snap = store
            .finalize(ParticipantId(8), Some(&MatchContext::new("m-2")))
            .unwrap();
        assert_eq!(snap.counters.combat.kills, 1);
        assert_eq!(snap.name, "eight");
        assert!(store.try_get(ParticipantId(8)).is_none());
        assert!(store.finalize(ParticipantId(8), None).is_none());
    }

    #[test]
    fn participant_ids_are_sorted() {
        let store = SessionStore::new();
        for id in [30, 10, 20] {
            store.ensure(ParticipantId(id), "p").unwrap();
        }
        assert_eq!(
            store.participant_ids(),
            vec![ParticipantId(10), ParticipantId(20), ParticipantId(30)]
        );
    }

    #[test]
    fn concurrent_mutations_are_never_lost() {
        const CALLERS: u32 = 32;
        const MUTATIONS: u32 = 10_000;

        let store = SessionStore::new();
        store.ensure(ParticipantId(1), "p").unwrap();

        std::thread::scope(|scope| {
            for caller in 0..CALLERS {
                let store = &store;
                let share = MUTATIONS / CALLERS + u32::from(caller < MUTATIONS % CALLERS);
                scope.spawn(move || {
                    for _ in 0..share {
                        assert!(store.mutate(ParticipantId(1), |agg| agg.apply(&kill())));
                    }
                });
            }
            // A concurrent capturer must not lose updates either.
            scope.spawn(|| {
                for _ in 0..50 {
                    store.capture_snapshots(true, None);
                }
            });
        });

        let kills = store
            .try_get(ParticipantId(1))
            .map(|agg| agg.counters().combat.kills);
        assert_eq!(kills, Some(MUTATIONS));
    }

    #[test]
    fn stale_handle_cannot_mutate_removed_participant() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(5), "p").unwrap();
        let stale = store.handle(ParticipantId(5)).unwrap();

        let snap = store.finalize(ParticipantId(5), None).unwrap();
        assert!(!apply(&stale, |agg| agg.apply(&kill())));
        assert_eq!(snap.counters.combat.kills, 0);
        assert!(stale.read().is_none());
        assert!(capture_one(&stale, false, None, Utc::now()).is_none());
    }

    #[test]
    fn ensure_after_removal_starts_fresh() {
        let store = SessionStore::new();
        store.ensure(ParticipantId(5), "p").unwrap();
        store.mutate(ParticipantId(5), |agg| agg.apply(&kill()));
        store.remove(ParticipantId(5)).unwrap();

        let fresh = store.ensure(ParticipantId(5), "p").unwrap();
        assert_eq!(fresh.counters().combat.kills, 0);
        assert!(fresh.is_dirty());
    }

    #[test]
    fn finalize_reports_exactly_the_accepted_mutations() {
        for _ in 0..20 {
            let store = SessionStore::new();
            store.ensure(ParticipantId(1), "p").unwrap();
            let accepted = AtomicU32::new(0);

            let snap = std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        for _ in 0..500 {
                            if store.mutate(ParticipantId(1), |agg| agg.apply(&kill())) {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
                std::thread::yield_now();
                store.finalize(ParticipantId(1), None)
            });

            let snap = snap.unwrap();
            assert_eq!(snap.counters.combat.kills, accepted.load(Ordering::SeqCst));
            assert!(store.is_empty());
        }
    }
}
