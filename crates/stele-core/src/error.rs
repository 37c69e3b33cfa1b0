//! Error types and result aliases for Stele.
//!
//! Deliberate rejections (banned ancestor, cardinality limit, malformed
//! sample) are expressed as values (`None` / `false`) on the hot path and
//! never pass through this module. `Error` covers storage failures and
//! broken preconditions: the cases a caller must handle or has caused.

use std::fmt;

/// The result type used throughout Stele.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Stele operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A metric name failed validation where a valid name was required.
    #[error("invalid metric name: {0}")]
    InvalidName(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A directory content load failed or produced no data for a waiter.
    #[error("directory load failed: {message}")]
    LoadFailed {
        /// Description of the load failure.
        message: String,
    },

    /// A precondition for the operation was not met.
    ///
    /// These are programming-invariant violations (for example modifying a
    /// node to `SIMPLE` directly); they are surfaced immediately and never
    /// retried.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the failed precondition.
        message: String,
    },

    /// The component is shutting down and no longer accepts work.
    #[error("shutting down")]
    ShuttingDown,

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new load failure for the given directory.
    #[must_use]
    pub fn load_failed(message: impl fmt::Display) -> Self {
        Self::LoadFailed {
            message: message.to_string(),
        }
    }

    /// Creates a new precondition failure.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
