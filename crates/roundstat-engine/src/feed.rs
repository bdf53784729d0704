//! JSON-lines feed from the event-translation layer.
//!
//! Each line is one object tagged by `type`:
//!
//! ```text
//! {"type":"join","participant_id":76561198000000001,"name":"alice"}
//! {"type":"match_start","match_key":"m-42","map_name":"de_inferno"}
//! {"type":"round_start"}
//! {"type":"fact","participant_id":76561198000000001,"fact":{"kind":"shot_fired","weapon":"ak47"}}
//! {"type":"kill","killer":76561198000000001,"victim":76561198000000002,"weapon":"ak47","headshot":true}
//! {"type":"round_end","winners":[76561198000000001],"winner":"t","reason":"elimination"}
//! {"type":"leave","participant_id":76561198000000002}
//! {"type":"match_end"}
//! ```
//!
//! [`Feed`] owns the session store and the match/round position, and hands
//! snapshots and lifecycle events to the persistence queue. Nothing here
//! waits on I/O.

use roundstat_core::ingest::{self, KillReport};
use roundstat_core::session::SessionStore;
use roundstat_pipeline::{PersistMessage, PersistenceQueue};
use roundstat_types::{
    Fact, MatchContext, MatchEvent, MatchEventKind, ParticipantId, RoundEvent,
};
use serde::Deserialize;

use crate::error::EngineError;

/// One line of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedLine {
    /// A participant connected or changed name.
    Join {
        /// Stable participant id.
        participant_id: ParticipantId,
        /// Display name.
        name: String,
    },
    /// A participant left; its final snapshot is persisted.
    Leave {
        /// Participant that left.
        participant_id: ParticipantId,
    },
    /// A single fact about one participant.
    Fact {
        /// Participant the fact is about.
        participant_id: ParticipantId,
        /// The fact itself.
        fact: Fact,
    },
    /// A kill, expanded into kill, death, assist and trade facts.
    Kill {
        /// Participant credited with the kill.
        killer: ParticipantId,
        /// Participant who died.
        victim: ParticipantId,
        /// Assisting participant.
        #[serde(default)]
        assister: Option<ParticipantId>,
        /// Whether the assist was a flash assist.
        #[serde(default)]
        flash_assist: bool,
        /// Weapon class.
        weapon: String,
        /// Headshot kill.
        #[serde(default)]
        headshot: bool,
        /// First kill of the round.
        #[serde(default)]
        first_of_round: bool,
        /// Teammate whose death this kill avenged.
        #[serde(default)]
        traded_teammate: Option<ParticipantId>,
    },
    /// A round started. Without `round`, the next number is used.
    RoundStart {
        /// Round number.
        #[serde(default)]
        round: Option<u32>,
    },
    /// The round ended.
    RoundEnd {
        /// Participants on the winning side.
        #[serde(default)]
        winners: Vec<ParticipantId>,
        /// Winning side label.
        #[serde(default)]
        winner: Option<String>,
        /// Why the round ended.
        #[serde(default)]
        reason: Option<String>,
    },
    /// A match started.
    MatchStart {
        /// Match key.
        match_key: String,
        /// Map being played.
        #[serde(default)]
        map_name: Option<String>,
    },
    /// The match ended.
    MatchEnd,
}

#[derive(Debug, Clone)]
struct MatchPosition {
    match_key: String,
    map_name: Option<String>,
    round: u32,
}

/// Drives the session store from feed lines.
#[derive(Debug)]
pub struct Feed {
    store: SessionStore,
    queue: PersistenceQueue,
    position: Option<MatchPosition>,
    capture_on_round_end: bool,
}

impl Feed {
    /// A feed with no match in progress.
    pub const fn new(store: SessionStore, queue: PersistenceQueue, capture_on_round_end: bool) -> Self {
        Self {
            store,
            queue,
            position: None,
            capture_on_round_end,
        }
    }

    /// The session store.
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Match-level context attached to periodic captures.
    pub fn match_context(&self) -> Option<MatchContext> {
        self.position
            .as_ref()
            .map(|p| MatchContext::new(&p.match_key))
    }

    /// Parse and apply one raw line.
    pub fn handle_line(&mut self, raw: &str) -> Result<(), EngineError> {
        let line: FeedLine = serde_json::from_str(raw)?;
        self.dispatch(line)
    }

    /// Apply one parsed line.
    pub fn dispatch(&mut self, line: FeedLine) -> Result<(), EngineError> {
        match line {
            FeedLine::Join {
                participant_id,
                name,
            } => {
                self.store.ensure(participant_id, &name)?;
            }
            FeedLine::Leave { participant_id } => {
                let context = self.match_context();
                if let Some(snapshot) = self.store.finalize(participant_id, context.as_ref()) {
                    self.queue.enqueue(snapshot.into());
                }
            }
            FeedLine::Fact {
                participant_id,
                fact,
            } => {
                ingest::apply_fact(&self.store, participant_id, &fact)?;
            }
            FeedLine::Kill {
                killer,
                victim,
                assister,
                flash_assist,
                weapon,
                headshot,
                first_of_round,
                traded_teammate,
            } => {
                let report = KillReport {
                    killer,
                    victim,
                    assister: assister.map(|id| (id, flash_assist)),
                    weapon,
                    headshot,
                    first_of_round,
                    traded_teammate,
                };
                ingest::record_kill(&self.store, &report)?;
            }
            FeedLine::RoundStart { round } => self.start_round(round),
            FeedLine::RoundEnd {
                winners,
                winner,
                reason,
            } => self.end_round(&winners, winner, reason),
            FeedLine::MatchStart {
                match_key,
                map_name,
            } => self.start_match(match_key, map_name),
            FeedLine::MatchEnd => self.end_match(),
        }
        Ok(())
    }

    /// Capture and queue every dirty participant. Returns how many
    /// snapshots were accepted.
    pub fn capture_dirty(&self) -> usize {
        let context = self.match_context();
        let snapshots = self.store.capture_snapshots(true, context.as_ref());
        self.queue.enqueue_snapshots(snapshots)
    }

    /// Capture and queue every participant.
    pub fn capture_all(&self) -> usize {
        let context = self.match_context();
        let snapshots = self.store.capture_snapshots(false, context.as_ref());
        self.queue.enqueue_snapshots(snapshots)
    }

    fn start_round(&mut self, round: Option<u32>) {
        ingest::begin_round(&self.store);
        if let Some(position) = self.position.as_mut() {
            let next = position.round.saturating_add(1);
            position.round = round.unwrap_or(next);
            tracing::debug!(match_key = %position.match_key, round = position.round, "round started");
        }
    }

    fn end_round(&mut self, winners: &[ParticipantId], winner: Option<String>, reason: Option<String>) {
        ingest::close_round(&self.store, winners);
        let Some(position) = self.position.as_ref() else {
            return;
        };

        let now = self.store.clock().now();
        self.queue.enqueue(PersistMessage::RoundLifecycle(RoundEvent {
            match_key: position.match_key.clone(),
            round: position.round,
            winner,
            reason,
            occurred_at: now,
        }));

        if self.capture_on_round_end {
            let context = MatchContext::for_round(&position.match_key, position.round);
            let snapshots = self.store.capture_snapshots(true, Some(&context));
            let captured = snapshots.len();
            let queued = self.queue.enqueue_snapshots(snapshots);
            tracing::debug!(
                match_key = %position.match_key,
                round = position.round,
                captured,
                queued,
                "round-end capture"
            );
        }
    }

    fn start_match(&mut self, match_key: String, map_name: Option<String>) {
        if let Some(previous) = self.position.as_ref() {
            tracing::warn!(
                previous = %previous.match_key,
                next = %match_key,
                "match started while another was in progress"
            );
        }
        let now = self.store.clock().now();
        self.queue.enqueue(PersistMessage::MatchLifecycle(MatchEvent {
            match_key: match_key.clone(),
            kind: MatchEventKind::Started,
            map_name: map_name.clone(),
            occurred_at: now,
        }));
        tracing::info!(match_key = %match_key, map = ?map_name, "match started");
        self.position = Some(MatchPosition {
            match_key,
            map_name,
            round: 0,
        });
    }

    fn end_match(&mut self) {
        let Some(position) = self.position.take() else {
            tracing::warn!("match end without a match in progress");
            return;
        };
        let context = MatchContext::new(&position.match_key);
        let queued = self
            .queue
            .enqueue_snapshots(self.store.capture_snapshots(false, Some(&context)));
        self.queue.enqueue(PersistMessage::MatchLifecycle(MatchEvent {
            match_key: position.match_key.clone(),
            kind: MatchEventKind::Ended,
            map_name: position.map_name,
            occurred_at: self.store.clock().now(),
        }));
        tracing::info!(
            match_key = %position.match_key,
            rounds = position.round,
            snapshots = queued,
            "match ended"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use roundstat_core::clock::ManualClock;
    use roundstat_pipeline::{HealthCounters, QueueReceiver, channel};

    use super::*;

    const ALICE: u64 = 76_561_198_000_000_001;
    const BOB: u64 = 76_561_198_000_000_002;

    fn feed(capture_on_round_end: bool) -> (Feed, QueueReceiver) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()));
        let (queue, rx) = channel(100, Arc::new(HealthCounters::new()));
        let feed = Feed::new(SessionStore::with_clock(clock), queue, capture_on_round_end);
        (feed, rx)
    }

    fn drain(rx: &mut QueueReceiver) -> Vec<PersistMessage> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    fn join_both(feed: &mut Feed) {
        feed.handle_line(&format!(r#"{{"type":"join","participant_id":{ALICE},"name":"alice"}}"#))
            .unwrap();
        feed.handle_line(&format!(r#"{{"type":"join","participant_id":{BOB},"name":"bob"}}"#))
            .unwrap();
    }

    #[test]
    fn parses_every_line_type() {
        let lines = [
            r#"{"type":"join","participant_id":1,"name":"a"}"#,
            r#"{"type":"leave","participant_id":1}"#,
            r#"{"type":"fact","participant_id":1,"fact":{"kind":"bomb_planted"}}"#,
            r#"{"type":"kill","killer":1,"victim":2,"weapon":"awp"}"#,
            r#"{"type":"round_start","round":3}"#,
            r#"{"type":"round_end","winners":[1]}"#,
            r#"{"type":"match_start","match_key":"m"}"#,
            r#"{"type":"match_end"}"#,
        ];
        for line in lines {
            assert!(serde_json::from_str::<FeedLine>(line).is_ok(), "{line}");
        }
    }

    #[test]
    fn unknown_type_and_invalid_facts_are_rejected() {
        let (mut feed, _rx) = feed(true);
        join_both(&mut feed);

        assert!(matches!(
            feed.handle_line(r#"{"type":"teleport"}"#),
            Err(EngineError::Parse { .. })
        ));
        let bad = format!(
            r#"{{"type":"fact","participant_id":{ALICE},"fact":{{"kind":"shot_fired","weapon":""}}}}"#
        );
        assert!(matches!(feed.handle_line(&bad), Err(EngineError::Fact { .. })));
        assert!(matches!(
            feed.handle_line(r#"{"type":"join","participant_id":0,"name":"bot"}"#),
            Err(EngineError::Session { .. })
        ));
    }

    #[test]
    fn kill_line_updates_both_participants() {
        let (mut feed, _rx) = feed(true);
        join_both(&mut feed);
        feed.handle_line(&format!(
            r#"{{"type":"kill","killer":{ALICE},"victim":{BOB},"weapon":"ak47","headshot":true}}"#
        ))
        .unwrap();

        let alice = feed.store().try_get(ParticipantId(ALICE)).unwrap();
        let bob = feed.store().try_get(ParticipantId(BOB)).unwrap();
        assert_eq!(alice.counters().combat.kills, 1);
        assert_eq!(alice.counters().combat.headshots, 1);
        assert_eq!(bob.counters().combat.deaths, 1);
    }

    #[test]
    fn round_end_queues_event_and_round_snapshots() {
        let (mut feed, mut rx) = feed(true);
        join_both(&mut feed);
        feed.handle_line(r#"{"type":"match_start","match_key":"m-1","map_name":"de_dust2"}"#)
            .unwrap();
        feed.handle_line(r#"{"type":"round_start"}"#).unwrap();
        feed.handle_line(&format!(
            r#"{{"type":"round_end","winners":[{ALICE}],"winner":"t","reason":"elimination"}}"#
        ))
        .unwrap();

        let messages = drain(&mut rx);
        assert!(matches!(
            &messages[0],
            PersistMessage::MatchLifecycle(e) if e.kind == MatchEventKind::Started
        ));
        match &messages[1] {
            PersistMessage::RoundLifecycle(event) => {
                assert_eq!(event.match_key, "m-1");
                assert_eq!(event.round, 1);
                assert_eq!(event.winner.as_deref(), Some("t"));
            }
            other => panic!("unexpected message {other:?}"),
        }
        let snapshots: Vec<_> = messages[2..]
            .iter()
            .map(|m| match m {
                PersistMessage::PlayerStats(s) => s,
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].context, Some(MatchContext::for_round("m-1", 1)));
        assert_eq!(snapshots[0].counters.rounds.rounds_won, 1);
        assert_eq!(snapshots[1].counters.rounds.rounds_won, 0);
    }

    #[test]
    fn round_end_capture_can_be_disabled() {
        let (mut feed, mut rx) = feed(false);
        join_both(&mut feed);
        feed.handle_line(r#"{"type":"match_start","match_key":"m-1"}"#).unwrap();
        feed.handle_line(r#"{"type":"round_end","winners":[]}"#).unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|m| !matches!(m, PersistMessage::PlayerStats(_))));
    }

    #[test]
    fn periodic_capture_only_sends_dirty_participants() {
        let (mut feed, mut rx) = feed(true);
        join_both(&mut feed);
        assert_eq!(feed.capture_dirty(), 2);
        assert_eq!(feed.capture_dirty(), 0);

        feed.handle_line(&format!(
            r#"{{"type":"fact","participant_id":{BOB},"fact":{{"kind":"bomb_defused"}}}}"#
        ))
        .unwrap();
        assert_eq!(feed.capture_dirty(), 1);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn leave_persists_final_snapshot_and_forgets_participant() {
        let (mut feed, mut rx) = feed(true);
        join_both(&mut feed);
        feed.handle_line(&format!(r#"{{"type":"leave","participant_id":{BOB}}}"#))
            .unwrap();

        assert!(feed.store().try_get(ParticipantId(BOB)).is_none());
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            PersistMessage::PlayerStats(s) if s.participant_id == ParticipantId(BOB)
        ));
    }

    #[test]
    fn match_end_flushes_everyone_and_clears_context() {
        let (mut feed, mut rx) = feed(true);
        join_both(&mut feed);
        feed.handle_line(r#"{"type":"match_start","match_key":"m-9"}"#).unwrap();
        drain(&mut rx);

        feed.handle_line(r#"{"type":"match_end"}"#).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[2],
            PersistMessage::MatchLifecycle(e) if e.kind == MatchEventKind::Ended
        ));
        assert!(feed.match_context().is_none());
    }
}
