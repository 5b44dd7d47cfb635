#![forbid(unsafe_code)]
//! Shared vocabulary for the lid commit tracker.
//!
//! A lid names a document slot inside one store shard. The tracker reports,
//! per lid and in aggregate, how far the mutations issued against it have
//! progressed towards being committed. This crate holds the value types only;
//! the trackers themselves live in `lct-core`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Local document identifier within one store shard.
///
/// Lids are reused after compaction, so a lid is not a durable identity. The
/// tracker only ever uses it as an opaque key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lid(pub u32);

impl fmt::Display for Lid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Lid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Commit readiness of a lid, a set of lids, or a whole tracker.
///
/// Variants are listed from least ready to most ready. When several states
/// are combined the least ready one wins; see [`aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitState {
    /// An operation is outstanding and no commit batch covers it yet.
    NeedCommit,
    /// Every outstanding operation is covered by a commit batch in flight.
    Waiting,
    /// Nothing is pending.
    Completed,
}

impl CommitState {
    pub const ALL: [Self; 3] = [Self::NeedCommit, Self::Waiting, Self::Completed];

    /// Readiness rank; lower is more severe.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::NeedCommit => 0,
            Self::Waiting => 1,
            Self::Completed => 2,
        }
    }

    /// Whether `self` is at least as ready as `wanted`.
    #[must_use]
    pub const fn satisfies(self, wanted: Self) -> bool {
        self.rank() >= wanted.rank()
    }

    /// The less ready of two states.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NeedCommit => "NEED_COMMIT",
            Self::Waiting => "WAITING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold a set of states into the least ready one.
///
/// An empty input is [`CommitState::Completed`]. The fold stops early once
/// [`CommitState::NeedCommit`] is seen since nothing ranks below it.
pub fn aggregate<I>(states: I) -> CommitState
where
    I: IntoIterator<Item = CommitState>,
{
    let mut worst = CommitState::Completed;
    for state in states {
        worst = worst.combine(state);
        if worst == CommitState::NeedCommit {
            break;
        }
    }
    worst
}

/// Which tracker implementation a shard runs with.
///
/// Chosen once at construction and fixed for the lifetime of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackerKind {
    /// A lid is pending exactly while it has a live token.
    SinglePhase,
    /// Separates uncovered operations from operations covered by a commit batch.
    #[default]
    TwoPhase,
}

impl TrackerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SinglePhase => "single-phase",
            Self::TwoPhase => "two-phase",
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Must match the serde names.
        match s {
            "single-phase" => Ok(Self::SinglePhase),
            "two-phase" => Ok(Self::TwoPhase),
            _ => Err(ParseError::UnknownTrackerKind(s.to_owned())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown tracker kind: {0:?} (expected single-phase or two-phase)")]
    UnknownTrackerKind(String),
}
