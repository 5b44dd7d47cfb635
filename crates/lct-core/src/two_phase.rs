//! Two-phase tracker: need-commit versus waiting-for-commit.
//!
//! A token makes its lid [`CommitState::NeedCommit`]. Calling
//! [`produce_snapshot`](PendingLidTracker::produce_snapshot) captures every lid
//! with a live token into a new generation; those lids read
//! [`CommitState::Waiting`] while the generation is live. Releasing the
//! snapshot token drops the generation, after which each member reads
//! `NeedCommit` if it still has a live token and `Completed` otherwise.
//!
//! # Epochs
//!
//! Each token remembers the number of the last generation created before it
//! (its epoch). A token with epoch `e` is covered by generation `g` exactly
//! when `e < g` and the lid is a member of `g`. A lid reads `NeedCommit` when
//! its newest token is not covered by the newest live generation holding the
//! lid. This gives:
//!
//! - tokens produced before a snapshot read `Waiting` while it is live, even
//!   though they are still held;
//! - a token produced on a captured lid after the snapshot reads `NeedCommit`;
//! - when a newer generation is released before an older one, tokens it alone
//!   covered fall back to `NeedCommit`.
//!
//! The global state is `Waiting` while any generation is live, including one
//! that captured no lids.
//!
//! # Logging
//!
//! - **TRACE** `lct::tracker::two_phase`: `lid_produce`, `lid_consume`
//! - **DEBUG** `lct::tracker::two_phase`: `snapshot_produce`, `snapshot_consume`
//! - **ERROR** `lct::tracker::two_phase`: `lid_consume_untracked`,
//!   `snapshot_consume_untracked`

use crate::table::GuardedTable;
use crate::{
    LidCommitState, LidScope, PendingLidTracker, SnapshotToken, Token, TokenSink, TrackerStats,
};
use lct_types::{CommitState, Lid, TrackerKind, aggregate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, error, trace};

#[derive(Debug, Default)]
struct LidEntry {
    /// Live token count keyed by epoch.
    inflight: BTreeMap<u64, u32>,
    /// Live generations this lid was captured in.
    generations: BTreeSet<u64>,
}

impl LidEntry {
    fn is_idle(&self) -> bool {
        self.inflight.is_empty() && self.generations.is_empty()
    }

    fn live_tokens(&self) -> u64 {
        self.inflight.values().map(|&c| u64::from(c)).sum()
    }

    fn state(&self) -> CommitState {
        let newest_token = self.inflight.keys().next_back();
        let newest_cover = self.generations.last();
        match (newest_token, newest_cover) {
            (Some(&epoch), Some(&cover)) if epoch >= cover => CommitState::NeedCommit,
            (Some(_), None) => CommitState::NeedCommit,
            (_, Some(_)) => CommitState::Waiting,
            (None, None) => CommitState::Completed,
        }
    }
}

#[derive(Debug, Default)]
struct TwoPhaseTable {
    entries: HashMap<Lid, LidEntry>,
    /// Live generations and the lids each captured.
    generations: BTreeMap<u64, Vec<Lid>>,
    last_generation: u64,
}

impl TwoPhaseTable {
    fn lid_state(&self, lid: Lid) -> CommitState {
        self.entries
            .get(&lid)
            .map_or(CommitState::Completed, LidEntry::state)
    }

    fn scope_state(&self, scope: LidScope<'_>) -> CommitState {
        match scope {
            LidScope::All => {
                let barrier = if self.generations.is_empty() {
                    CommitState::Completed
                } else {
                    CommitState::Waiting
                };
                barrier.combine(aggregate(self.entries.values().map(LidEntry::state)))
            }
            LidScope::Lid(lid) => self.lid_state(lid),
            LidScope::Lids(lids) => aggregate(lids.iter().map(|&lid| self.lid_state(lid))),
        }
    }

    /// Drop the entry for `lid` if nothing references it any more.
    fn prune(&mut self, lid: Lid) {
        if self.entries.get(&lid).is_some_and(LidEntry::is_idle) {
            self.entries.remove(&lid);
        }
    }
}

/// Tracker that distinguishes uncovered operations from operations covered by
/// an in-flight commit.
#[derive(Debug, Default)]
pub struct TwoPhaseTracker {
    table: GuardedTable<TwoPhaseTable>,
}

impl TwoPhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSink for TwoPhaseTracker {
    fn consume(&self, lid: Lid, epoch: u64) {
        let remaining = self.table.update_and_notify(|table| {
            let entry = table.entries.get_mut(&lid)?;
            let count = entry.inflight.get_mut(&epoch)?;
            *count -= 1;
            if *count == 0 {
                entry.inflight.remove(&epoch);
            }
            let remaining = entry.live_tokens();
            table.prune(lid);
            Some(remaining)
        });
        match remaining {
            Some(remaining) => trace!(
                target: "lct::tracker::two_phase",
                lid = lid.0,
                epoch,
                remaining,
                "lid_consume"
            ),
            None => {
                error!(
                    target: "lct::tracker::two_phase",
                    lid = lid.0,
                    epoch,
                    "lid_consume_untracked"
                );
                debug_assert!(false, "released a token for untracked lid {lid} epoch {epoch}");
            }
        }
    }

    fn consume_snapshot(&self, generation: u64) {
        let members = self.table.update_and_notify(|table| {
            let lids = table.generations.remove(&generation)?;
            for &lid in &lids {
                if let Some(entry) = table.entries.get_mut(&lid) {
                    entry.generations.remove(&generation);
                }
                table.prune(lid);
            }
            Some(lids.len())
        });
        match members {
            Some(members) => debug!(
                target: "lct::tracker::two_phase",
                generation,
                members,
                "snapshot_consume"
            ),
            None => {
                error!(
                    target: "lct::tracker::two_phase",
                    generation,
                    "snapshot_consume_untracked"
                );
                debug_assert!(false, "released unknown snapshot generation {generation}");
            }
        }
    }
}

impl LidCommitState for TwoPhaseTracker {
    fn scope_state(&self, scope: LidScope<'_>) -> CommitState {
        self.table.read(|table| table.scope_state(scope))
    }

    fn wait_scope(
        &self,
        scope: LidScope<'_>,
        wanted: CommitState,
        deadline: Option<Instant>,
    ) -> Result<CommitState, CommitState> {
        self.table.wait_until(deadline, |table| {
            let state = table.scope_state(scope);
            if state.satisfies(wanted) {
                Ok(state)
            } else {
                Err(state)
            }
        })
    }

    fn pending_lids(&self) -> Vec<Lid> {
        let mut lids: Vec<Lid> = self.table.read(|table| {
            table
                .entries
                .iter()
                .filter(|(_, entry)| entry.state() != CommitState::Completed)
                .map(|(&lid, _)| lid)
                .collect()
        });
        lids.sort_unstable();
        lids
    }
}

impl PendingLidTracker for TwoPhaseTracker {
    fn produce(&self, lid: Lid) -> Token<'_> {
        let epoch = self.table.update(|table| {
            let epoch = table.last_generation;
            *table
                .entries
                .entry(lid)
                .or_default()
                .inflight
                .entry(epoch)
                .or_insert(0) += 1;
            epoch
        });
        trace!(
            target: "lct::tracker::two_phase",
            lid = lid.0,
            epoch,
            "lid_produce"
        );
        Token::new(self, lid, epoch)
    }

    fn produce_snapshot(&self) -> SnapshotToken<'_> {
        let (generation, members) = self.table.update_and_notify(|table| {
            table.last_generation += 1;
            let generation = table.last_generation;
            let mut lids = Vec::new();
            for (&lid, entry) in &mut table.entries {
                if !entry.inflight.is_empty() {
                    entry.generations.insert(generation);
                    lids.push(lid);
                }
            }
            let members = lids.len();
            table.generations.insert(generation, lids);
            (generation, members)
        });
        debug!(
            target: "lct::tracker::two_phase",
            generation,
            members,
            "snapshot_produce"
        );
        SnapshotToken::new(self, generation)
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::TwoPhase
    }

    fn stats(&self) -> TrackerStats {
        self.table.read(|table| TrackerStats {
            tracked_lids: table.entries.len(),
            live_tokens: table.entries.values().map(LidEntry::live_tokens).sum(),
            live_snapshots: table.generations.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    const LID_1: Lid = Lid(1);
    const LIDS_2_1_3: [Lid; 3] = [Lid(2), LID_1, Lid(3)];
    const LIDS_2_3: [Lid; 2] = [Lid(2), Lid(3)];

    fn assert_states(tracker: &TwoPhaseTracker, expected: CommitState) {
        assert_eq!(tracker.state(), expected);
        assert_eq!(tracker.lid_state(LID_1), expected);
        assert_eq!(tracker.lids_state(&LIDS_2_1_3), expected);
        assert_eq!(tracker.lids_state(&LIDS_2_3), CommitState::Completed);
    }

    #[test]
    fn produce_drives_lid_to_need_commit() {
        let tracker = TwoPhaseTracker::new();
        assert_states(&tracker, CommitState::Completed);

        let outer = tracker.produce(LID_1);
        assert_states(&tracker, CommitState::NeedCommit);
        {
            let _inner = tracker.produce(LID_1);
            assert_states(&tracker, CommitState::NeedCommit);
        }
        assert_states(&tracker, CommitState::NeedCommit);
        drop(outer);
        assert_states(&tracker, CommitState::Completed);
        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn empty_snapshot_holds_global_state_waiting() {
        let tracker = TwoPhaseTracker::new();
        {
            let _snapshot = tracker.produce_snapshot();
            assert_eq!(tracker.state(), CommitState::Waiting);
            assert_eq!(tracker.lid_state(LID_1), CommitState::Completed);
            assert_eq!(tracker.lids_state(&LIDS_2_1_3), CommitState::Completed);
            assert!(tracker.pending_lids().is_empty());
        }
        assert_eq!(tracker.state(), CommitState::Completed);
    }

    #[test]
    fn snapshot_over_live_token_reads_waiting() {
        let tracker = TwoPhaseTracker::new();
        let token = tracker.produce(LID_1);
        let snapshot = tracker.produce_snapshot();
        assert_states(&tracker, CommitState::Waiting);

        // Generation released while the token lives: back to need-commit.
        drop(snapshot);
        assert_states(&tracker, CommitState::NeedCommit);
        drop(token);
        assert_states(&tracker, CommitState::Completed);
    }

    #[test]
    fn token_released_under_snapshot_stays_waiting_until_snapshot_release() {
        let tracker = TwoPhaseTracker::new();
        let token = tracker.produce(LID_1);
        let snapshot = tracker.produce_snapshot();
        drop(token);
        assert_states(&tracker, CommitState::Waiting);
        assert_eq!(tracker.pending_lids(), vec![LID_1]);
        assert_eq!(tracker.stats().live_tokens, 0);
        assert_eq!(tracker.stats().tracked_lids, 1);
        drop(snapshot);
        assert_states(&tracker, CommitState::Completed);
        assert_eq!(tracker.stats().tracked_lids, 0);
    }

    #[test]
    fn token_after_snapshot_is_not_covered() {
        let tracker = TwoPhaseTracker::new();
        let early = tracker.produce(LID_1);
        let snapshot = tracker.produce_snapshot();
        let late = tracker.produce(LID_1);
        assert_eq!(tracker.lid_state(LID_1), CommitState::NeedCommit);
        drop(late);
        assert_eq!(tracker.lid_state(LID_1), CommitState::Waiting);
        drop(early);
        assert_eq!(tracker.lid_state(LID_1), CommitState::Waiting);
        drop(snapshot);
        assert_eq!(tracker.lid_state(LID_1), CommitState::Completed);
    }

    #[test]
    fn lids_outside_generation_are_unaffected() {
        let tracker = TwoPhaseTracker::new();
        let first = tracker.produce(Lid(1));
        let snapshot = tracker.produce_snapshot();
        let second = tracker.produce(Lid(2));
        assert_eq!(tracker.lid_state(Lid(1)), CommitState::Waiting);
        assert_eq!(tracker.lid_state(Lid(2)), CommitState::NeedCommit);
        assert_eq!(tracker.state(), CommitState::NeedCommit);
        drop(second);
        assert_eq!(tracker.state(), CommitState::Waiting);
        drop(snapshot);
        assert_eq!(tracker.state(), CommitState::NeedCommit);
        drop(first);
        assert_eq!(tracker.state(), CommitState::Completed);
    }

    #[test]
    fn overlapping_generations_resolve_independently() {
        let tracker = TwoPhaseTracker::new();
        let a = tracker.produce(Lid(1));
        let older = tracker.produce_snapshot();
        let b = tracker.produce(Lid(1));
        let c = tracker.produce(Lid(2));
        let newer = tracker.produce_snapshot();
        assert_eq!(older.generation(), 1);
        assert_eq!(newer.generation(), 2);
        assert_eq!(tracker.lids_state(&[Lid(1), Lid(2)]), CommitState::Waiting);
        assert_eq!(tracker.stats().live_snapshots, 2);

        // Only the older generation covers `a`; `b` and `c` fall back.
        drop(newer);
        assert_eq!(tracker.lid_state(Lid(1)), CommitState::NeedCommit);
        assert_eq!(tracker.lid_state(Lid(2)), CommitState::NeedCommit);
        drop(b);
        assert_eq!(tracker.lid_state(Lid(1)), CommitState::Waiting);
        drop(c);
        assert_eq!(tracker.lid_state(Lid(2)), CommitState::Completed);
        drop(a);
        drop(older);
        assert_eq!(tracker.state(), CommitState::Completed);
        assert_eq!(tracker.stats(), TrackerStats::default());
    }

    #[test]
    fn older_generation_released_first_keeps_newer_cover() {
        let tracker = TwoPhaseTracker::new();
        let token = tracker.produce(LID_1);
        let older = tracker.produce_snapshot();
        let newer = tracker.produce_snapshot();
        drop(older);
        assert_eq!(tracker.lid_state(LID_1), CommitState::Waiting);
        drop(newer);
        assert_eq!(tracker.lid_state(LID_1), CommitState::NeedCommit);
        drop(token);
        assert_eq!(tracker.state(), CommitState::Completed);
    }

    #[test]
    fn repeated_queries_are_stable() {
        let tracker = TwoPhaseTracker::new();
        let _token = tracker.produce(Lid(4));
        let _snapshot = tracker.produce_snapshot();
        let _late = tracker.produce(Lid(8));
        let first = (tracker.state(), tracker.pending_lids(), tracker.stats());
        for _ in 0..10 {
            assert_eq!(
                (tracker.state(), tracker.pending_lids(), tracker.stats()),
                first
            );
        }
    }

    #[test]
    fn snapshot_release_wakes_waiters() {
        let tracker = TwoPhaseTracker::new();
        let snapshot = tracker.produce_snapshot();
        thread::scope(|scope| {
            let waiter = scope.spawn(|| tracker.wait_state(CommitState::Completed, LidScope::All));
            thread::sleep(Duration::from_millis(5));
            drop(snapshot);
            assert_eq!(waiter.join().expect("waiter"), CommitState::Completed);
        });
    }

    #[test]
    fn waiting_is_enough_for_wait_state_waiting() {
        let tracker = TwoPhaseTracker::new();
        let _token = tracker.produce(LID_1);
        thread::scope(|scope| {
            let waiter =
                scope.spawn(|| tracker.wait_state(CommitState::Waiting, LidScope::Lid(LID_1)));
            thread::sleep(Duration::from_millis(5));
            let snapshot = tracker.produce_snapshot();
            assert_eq!(waiter.join().expect("waiter"), CommitState::Waiting);
            drop(snapshot);
        });
    }

    #[test]
    fn bounded_wait_gives_up() {
        let tracker = TwoPhaseTracker::new();
        let _token = tracker.produce(LID_1);
        let outcome = tracker.wait_scope(
            LidScope::Lids(&LIDS_2_1_3),
            CommitState::Waiting,
            Some(Instant::now() + Duration::from_millis(5)),
        );
        assert_eq!(outcome, Err(CommitState::NeedCommit));
        let done = tracker.wait_scope(
            LidScope::Lids(&LIDS_2_3),
            CommitState::Completed,
            Some(Instant::now()),
        );
        assert_eq!(done, Ok(CommitState::Completed));
    }
}
