//! Runtime selection between the tracker implementations.

use crate::{
    LidCommitState, LidScope, PendingLidTracker, SinglePhaseTracker, SnapshotToken, Token,
    TrackerStats, TwoPhaseTracker,
};
use lct_error::LctError;
use lct_types::{CommitState, Lid, ParseError, TrackerKind};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Construction parameters for a [`LidCommitTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub kind: TrackerKind,
}

impl TrackerConfig {
    #[must_use]
    pub fn new(kind: TrackerKind) -> Self {
        Self { kind }
    }

    /// Parse a JSON document such as `{"kind": "single-phase"}`.
    ///
    /// # Errors
    ///
    /// [`LctError::InvalidConfig`] if the document is malformed or names an
    /// unknown field or tracker kind.
    pub fn from_json_str(json: &str) -> lct_error::Result<Self> {
        serde_json::from_str(json).map_err(|e| LctError::InvalidConfig(e.to_string()))
    }
}

/// Parse a tracker kind name, mapping failures into [`LctError`].
///
/// # Errors
///
/// [`LctError::UnknownTrackerKind`] for names other than the single-phase and
/// two-phase spellings.
pub fn parse_tracker_kind(name: &str) -> lct_error::Result<TrackerKind> {
    name.parse().map_err(|err: ParseError| match err {
        ParseError::UnknownTrackerKind(name) => LctError::UnknownTrackerKind(name),
    })
}

/// A tracker whose implementation is picked at construction time.
#[derive(Debug)]
pub enum LidCommitTracker {
    SinglePhase(SinglePhaseTracker),
    TwoPhase(TwoPhaseTracker),
}

impl LidCommitTracker {
    #[must_use]
    pub fn new(kind: TrackerKind) -> Self {
        info!(target: "lct::tracker", %kind, "lid_commit_tracker: initializing");
        match kind {
            TrackerKind::SinglePhase => Self::SinglePhase(SinglePhaseTracker::new()),
            TrackerKind::TwoPhase => Self::TwoPhase(TwoPhaseTracker::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.kind)
    }

    fn as_dyn(&self) -> &dyn PendingLidTracker {
        match self {
            Self::SinglePhase(tracker) => tracker,
            Self::TwoPhase(tracker) => tracker,
        }
    }
}

impl Default for LidCommitTracker {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

impl LidCommitState for LidCommitTracker {
    fn scope_state(&self, scope: LidScope<'_>) -> CommitState {
        self.as_dyn().scope_state(scope)
    }

    fn wait_scope(
        &self,
        scope: LidScope<'_>,
        wanted: CommitState,
        deadline: Option<Instant>,
    ) -> Result<CommitState, CommitState> {
        self.as_dyn().wait_scope(scope, wanted, deadline)
    }

    fn pending_lids(&self) -> Vec<Lid> {
        self.as_dyn().pending_lids()
    }
}

impl PendingLidTracker for LidCommitTracker {
    fn produce(&self, lid: Lid) -> Token<'_> {
        self.as_dyn().produce(lid)
    }

    fn produce_snapshot(&self) -> SnapshotToken<'_> {
        self.as_dyn().produce_snapshot()
    }

    fn kind(&self) -> TrackerKind {
        self.as_dyn().kind()
    }

    fn stats(&self) -> TrackerStats {
        self.as_dyn().stats()
    }
}
