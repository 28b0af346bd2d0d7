//! Store-level error types.

use thiserror::Error;

/// Errors surfaced by every store operation.
///
/// Payloads are plain strings so the same failure can be cloned out to
/// every caller waiting on a shared connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store was built or used with an invalid configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Connecting, or preparing the collection and its indexes, failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A single read or write against the collection failed.
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl StoreError {
    /// Whether a later call may succeed by reconnecting from scratch.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
