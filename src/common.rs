//! Common types and constants shared by every parakit component
//!
//! This module defines the crate error type, the result alias and the default
//! tuning constants used by the pump, the worker loop and the thin event.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for parakit operations
///
/// Errors are `Clone` because a single deferred outcome is delivered to every
/// continuation attached to it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O error raised by an adapted collaborator
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Compression or decompression failed
    #[error("Codec error ({codec}): {message}")]
    Codec {
        /// Name of the codec that failed
        codec: &'static str,
        /// Description of the failure
        message: String,
    },

    /// The producer side of a deferred was dropped without resolving it
    #[error("Deferred abandoned before it was resolved")]
    Abandoned,

    /// A deferred needed a tokio runtime and none was running
    #[error("No tokio runtime is available to run the operation")]
    NoRuntime,

    /// A spawned task could not be joined
    #[error("Task join error: {0}")]
    Join(String),

    /// `start()` was called on a worker that already left `Unstarted`
    #[error("Worker '{0}' was already started")]
    WorkerAlreadyStarted(String),

    /// A lifecycle call that requires a started worker was made too early
    #[error("Worker '{0}' has not been started")]
    WorkerNotStarted(String),

    /// The work unit of a worker returned an error
    #[error("Worker '{name}' failed: {source}")]
    WorkerFailed {
        /// Worker name
        name: String,
        /// Error returned by the work unit
        #[source]
        source: Box<Error>,
    },

    /// The work unit of a worker panicked
    #[error("Worker '{name}' panicked: {message}")]
    WorkerPanicked {
        /// Worker name
        name: String,
        /// Panic payload, when it was a string
        message: String,
    },

    /// The primitive was disposed and can no longer be waited on
    #[error("Synchronization primitive was disposed")]
    Disposed,

    /// An argument violated a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error raised by caller supplied code
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap any foreign error
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(Arc::new(error))
    }

    /// Build an error from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Other(Arc::new(Message(message.into())))
    }

    /// Returns the underlying I/O error kind, if this is an I/O error
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::Join(error.to_string())
    }
}

#[derive(Debug)]
struct Message(String);

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Result type alias for parakit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Default buffer size of the stream pump (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default sleep between two work-unit invocations of a worker thread
pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_millis(10);

/// Number of spin iterations a thin event performs before blocking
pub const SPIN_COUNT: usize = 64;

/// Iterations after which a spinning thin event starts yielding its time slice
pub const SPIN_YIELD_THRESHOLD: usize = 16;
