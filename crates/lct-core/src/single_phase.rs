//! Single-phase tracker: a lid is pending exactly while a token is live.
//!
//! There is no separate need-commit pool. A live token puts its lid in
//! [`CommitState::Waiting`]; releasing the last token for a lid returns it to
//! [`CommitState::Completed`]. Snapshot tokens are issued so callers can use
//! the same flush protocol for both variants, but they change nothing.
//!
//! # Logging
//!
//! - **TRACE** `lct::tracker::single_phase`: `lid_produce`, `lid_consume`
//! - **DEBUG** `lct::tracker::single_phase`: `snapshot_produce`, `snapshot_consume`
//! - **ERROR** `lct::tracker::single_phase`: `lid_consume_untracked`,
//!   `snapshot_consume_untracked`

use crate::table::GuardedTable;
use crate::{
    LidCommitState, LidScope, PendingLidTracker, SnapshotToken, Token, TokenSink, TrackerStats,
};
use lct_types::{CommitState, Lid, TrackerKind, aggregate};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, trace};

#[derive(Debug, Default)]
struct SinglePhaseTable {
    /// Live token count per lid. Zero counts are never stored.
    pending: HashMap<Lid, u32>,
    live_snapshots: usize,
    last_generation: u64,
}

impl SinglePhaseTable {
    fn lid_state(&self, lid: Lid) -> CommitState {
        if self.pending.contains_key(&lid) {
            CommitState::Waiting
        } else {
            CommitState::Completed
        }
    }

    fn scope_state(&self, scope: LidScope<'_>) -> CommitState {
        match scope {
            LidScope::All if self.pending.is_empty() => CommitState::Completed,
            LidScope::All => CommitState::Waiting,
            LidScope::Lid(lid) => self.lid_state(lid),
            LidScope::Lids(lids) => aggregate(lids.iter().map(|&lid| self.lid_state(lid))),
        }
    }
}

/// Tracker where producing a token is all it takes to make a lid wait.
#[derive(Debug, Default)]
pub struct SinglePhaseTracker {
    table: GuardedTable<SinglePhaseTable>,
}

impl SinglePhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSink for SinglePhaseTracker {
    fn consume(&self, lid: Lid, _epoch: u64) {
        let remaining = self.table.update_and_notify(|table| {
            let count = table.pending.get_mut(&lid)?;
            *count -= 1;
            let remaining = *count;
            if remaining == 0 {
                table.pending.remove(&lid);
            }
            Some(remaining)
        });
        match remaining {
            Some(remaining) => trace!(
                target: "lct::tracker::single_phase",
                lid = lid.0,
                remaining,
                "lid_consume"
            ),
            None => {
                error!(
                    target: "lct::tracker::single_phase",
                    lid = lid.0,
                    "lid_consume_untracked"
                );
                debug_assert!(false, "released a token for untracked lid {lid}");
            }
        }
    }

    fn consume_snapshot(&self, generation: u64) {
        let released = self.table.update_and_notify(|table| {
            let live = table.live_snapshots.checked_sub(1)?;
            table.live_snapshots = live;
            Some(live)
        });
        match released {
            Some(live_snapshots) => debug!(
                target: "lct::tracker::single_phase",
                generation,
                live_snapshots,
                "snapshot_consume"
            ),
            None => {
                error!(
                    target: "lct::tracker::single_phase",
                    generation,
                    "snapshot_consume_untracked"
                );
                debug_assert!(false, "released unknown snapshot generation {generation}");
            }
        }
    }
}

impl LidCommitState for SinglePhaseTracker {
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
        let mut lids: Vec<Lid> = self.table.read(|table| table.pending.keys().copied().collect());
        lids.sort_unstable();
        lids
    }
}

impl PendingLidTracker for SinglePhaseTracker {
    fn produce(&self, lid: Lid) -> Token<'_> {
        let count = self.table.update(|table| {
            let count = table.pending.entry(lid).or_insert(0);
            *count += 1;
            *count
        });
        trace!(
            target: "lct::tracker::single_phase",
            lid = lid.0,
            count,
            "lid_produce"
        );
        Token::new(self, lid, 0)
    }

    fn produce_snapshot(&self) -> SnapshotToken<'_> {
        let (generation, pending) = self.table.update(|table| {
            table.last_generation += 1;
            table.live_snapshots += 1;
            (table.last_generation, table.pending.len())
        });
        debug!(
            target: "lct::tracker::single_phase",
            generation,
            pending,
            "snapshot_produce"
        );
        SnapshotToken::new(self, generation)
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::SinglePhase
    }

    fn stats(&self) -> TrackerStats {
        self.table.read(|table| TrackerStats {
            tracked_lids: table.pending.len(),
            live_tokens: table.pending.values().map(|&c| u64::from(c)).sum(),
            live_snapshots: table.live_snapshots,
        })
    }
}
