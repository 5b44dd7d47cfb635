#![forbid(unsafe_code)]
//! Lid commit-state tracking.
//!
//! A document store shard mutates documents by lid from several writer
//! threads while a flush thread periodically persists what has been applied.
//! The trackers in this crate answer "is anything still pending for these
//! lids" without ever blocking the writers.
//!
//! # Protocol
//!
//! - A writer calls [`PendingLidTracker::produce`] before mutating a lid and
//!   holds the returned [`Token`] until the mutation is visible in memory.
//!   Dropping the token (or calling [`Token::release`]) retires the charge.
//! - The flush thread calls [`PendingLidTracker::produce_snapshot`] before
//!   persisting and drops the [`SnapshotToken`] once the write finished,
//!   whether it succeeded or failed.
//! - Anyone may query [`LidCommitState::state`], [`LidCommitState::lid_state`]
//!   or [`LidCommitState::lids_state`] at any time.
//!
//! Tokens borrow the tracker that issued them, so a tracker cannot be dropped
//! while a charge is outstanding. Tokens are move-only, so a charge cannot be
//! released twice.
//!
//! # Implementations
//!
//! - [`SinglePhaseTracker`]: a lid is [`CommitState::Waiting`] exactly while
//!   it has a live token. Snapshots have no effect.
//! - [`TwoPhaseTracker`]: a live token makes a lid
//!   [`CommitState::NeedCommit`]; a snapshot taken while the token is live
//!   moves the lid to [`CommitState::Waiting`] until the snapshot is released.
//! - [`LidCommitTracker`]: runtime choice between the two, built from a
//!   [`TrackerConfig`].

pub mod demo;
pub mod single_phase;
mod table;
pub mod tracker;
pub mod two_phase;
pub mod workload;

pub use lct_types::{CommitState, Lid, TrackerKind, aggregate};
pub use single_phase::SinglePhaseTracker;
pub use tracker::{LidCommitTracker, TrackerConfig};
pub use two_phase::TwoPhaseTracker;

use lct_error::LctError;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Which lids a query or wait is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidScope<'a> {
    /// Every lid the tracker currently knows about.
    All,
    /// A single lid.
    Lid(Lid),
    /// Exactly the listed lids.
    Lids(&'a [Lid]),
}

impl fmt::Display for LidScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all lids"),
            Self::Lid(lid) => write!(f, "lid {lid}"),
            Self::Lids(lids) => {
                f.write_str("lids [")?;
                for (i, lid) in lids.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{lid}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Point-in-time counters for a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrackerStats {
    /// Lids with an entry in the pending table.
    pub tracked_lids: usize,
    /// Tokens currently alive across all lids.
    pub live_tokens: u64,
    /// Snapshot tokens currently alive.
    pub live_snapshots: usize,
}

/// Read side of a tracker.
///
/// The state queries take the tracker lock for a short, bounded time and
/// never wait for a token to be released. The `wait_*` methods are the only
/// blocking operations and nothing inside the tracker calls them.
pub trait LidCommitState: Send + Sync {
    /// State aggregated over `scope`.
    fn scope_state(&self, scope: LidScope<'_>) -> CommitState;

    /// Block until `scope` is at least as ready as `wanted`.
    ///
    /// Returns `Ok` with the state that satisfied the wait, or `Err` with the
    /// last observed state once `deadline` passes.
    fn wait_scope(
        &self,
        scope: LidScope<'_>,
        wanted: CommitState,
        deadline: Option<Instant>,
    ) -> Result<CommitState, CommitState>;

    /// Lids that are not [`CommitState::Completed`], in ascending order.
    fn pending_lids(&self) -> Vec<Lid>;

    /// Aggregate over every tracked lid.
    fn state(&self) -> CommitState {
        self.scope_state(LidScope::All)
    }

    fn lid_state(&self, lid: Lid) -> CommitState {
        self.scope_state(LidScope::Lid(lid))
    }

    /// Aggregate over exactly `lids`. Untracked lids count as completed.
    fn lids_state(&self, lids: &[Lid]) -> CommitState {
        self.scope_state(LidScope::Lids(lids))
    }

    fn wait_state(&self, wanted: CommitState, scope: LidScope<'_>) -> CommitState {
        match self.wait_scope(scope, wanted, None) {
            Ok(state) | Err(state) => state,
        }
    }

    fn wait_complete(&self, scope: LidScope<'_>) {
        self.wait_state(CommitState::Completed, scope);
    }

    /// Like [`wait_state`](Self::wait_state) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LctError::WaitTimedOut`] if `scope` is still less ready than
    /// `wanted` when the timeout elapses.
    fn wait_state_timeout(
        &self,
        wanted: CommitState,
        scope: LidScope<'_>,
        timeout: Duration,
    ) -> lct_error::Result<CommitState> {
        let deadline = Instant::now().checked_add(timeout);
        self.wait_scope(scope, wanted, deadline)
            .map_err(|observed| {
                tracing::warn!(
                    target: "lct::tracker",
                    %scope,
                    %wanted,
                    %observed,
                    timeout_ms = duration_millis(timeout),
                    "lid_wait_timed_out"
                );
                LctError::WaitTimedOut {
                    wanted: wanted.to_string(),
                    observed: observed.to_string(),
                    scope: scope.to_string(),
                    waited_ms: duration_millis(timeout),
                }
            })
    }
}

/// Write side of a tracker.
pub trait PendingLidTracker: LidCommitState {
    /// Charge an outstanding operation against `lid`.
    #[must_use = "dropping the token releases the charge immediately"]
    fn produce(&self, lid: Lid) -> Token<'_>;

    /// Capture the lids charged right now as a commit barrier.
    #[must_use = "dropping the snapshot token resolves the barrier immediately"]
    fn produce_snapshot(&self) -> SnapshotToken<'_>;

    fn kind(&self) -> TrackerKind;

    fn stats(&self) -> TrackerStats;
}

/// Release hooks a tracker exposes to the tokens it issues.
pub(crate) trait TokenSink: Send + Sync {
    fn consume(&self, lid: Lid, epoch: u64);
    fn consume_snapshot(&self, generation: u64);
}

/// Scoped charge against one lid.
///
/// The charge is retired exactly once, when the token is dropped. Tokens can
/// be moved to and dropped on any thread.
#[must_use = "dropping the token releases the charge immediately"]
pub struct Token<'a> {
    sink: &'a dyn TokenSink,
    lid: Lid,
    epoch: u64,
}

impl<'a> Token<'a> {
    pub(crate) fn new(sink: &'a dyn TokenSink, lid: Lid, epoch: u64) -> Self {
        Self { sink, lid, epoch }
    }

    #[must_use]
    pub fn lid(&self) -> Lid {
        self.lid
    }

    /// Retire the charge now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Token<'_> {
    fn drop(&mut self) {
        self.sink.consume(self.lid, self.epoch);
    }
}

impl fmt::Debug for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("lid", &self.lid)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Scoped commit barrier.
///
/// Dropping it resolves the generation it captured. Drop it on both the
/// success and failure path of the flush it guards.
#[must_use = "dropping the snapshot token resolves the barrier immediately"]
pub struct SnapshotToken<'a> {
    sink: &'a dyn TokenSink,
    generation: u64,
}

impl<'a> SnapshotToken<'a> {
    pub(crate) fn new(sink: &'a dyn TokenSink, generation: u64) -> Self {
        Self { sink, generation }
    }

    /// Sequence number of the captured generation, starting at 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SnapshotToken<'_> {
    fn drop(&mut self) {
        self.sink.consume_snapshot(self.generation);
    }
}

impl fmt::Debug for SnapshotToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotToken")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
