//! Error handling for parakit operations
//!
//! The error type lives in [`crate::common`] next to the other shared types;
//! this module re-exports it under the conventional path. Errors are built
//! with thiserror and are cheap to clone so a single deferred outcome can be
//! delivered to any number of continuations.

pub use crate::common::Error;
pub use crate::common::Result;
