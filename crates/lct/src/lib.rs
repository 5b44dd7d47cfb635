#![forbid(unsafe_code)]
//! Lid commit-state tracker public API facade.
//!
//! Re-exports the trackers from `lct-core` together with the error and value
//! types they use. Downstream consumers (the CLI, document store shards)
//! depend on this crate only.

pub use lct_core::*;
pub use lct_error::{LctError, Result};
pub use lct_types::ParseError;
