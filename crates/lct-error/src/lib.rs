#![forbid(unsafe_code)]
//! Error types for the lid commit tracker.
//!
//! The tracker operations themselves are total: producing and releasing
//! tokens and querying state never fail. Errors only arise at the edges:
//! loading configuration, bounded waits that give up, and I/O in the
//! command line front end.
//!
//! `lct-error` does not depend on `lct-types`. Typed values (states, lids,
//! tracker kinds) are rendered to strings where they cross into this crate.
//!
//! ## Exit status mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | underlying errno or `EIO` |
//! | `UnknownTrackerKind` | `EINVAL` |
//! | `InvalidConfig` | `EINVAL` |
//! | `WaitTimedOut` | `ETIMEDOUT` |
//! | `NotConverged` | `EAGAIN` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LctError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A tracker kind string did not name a known implementation.
    #[error("unknown tracker kind: {0}")]
    UnknownTrackerKind(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bounded wait elapsed before the requested readiness was reached.
    #[error("timed out after {waited_ms} ms waiting for {wanted} on {scope} (last seen {observed})")]
    WaitTimedOut {
        wanted: String,
        observed: String,
        scope: String,
        waited_ms: u64,
    },

    /// A tracker still held pending work after every token was released.
    #[error("tracker did not converge: {0}")]
    NotConverged(String),
}

impl LctError {
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::UnknownTrackerKind(_) | Self::InvalidConfig(_) => libc::EINVAL,
            Self::WaitTimedOut { .. } => libc::ETIMEDOUT,
            Self::NotConverged(_) => libc::EAGAIN,
        }
    }
}

pub type Result<T> = std::result::Result<T, LctError>;
