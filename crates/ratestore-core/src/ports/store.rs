//! Rate limit store port.

use async_trait::async_trait;

use crate::domain::{ClientRateLimitInfo, WindowOptions};
use crate::error::StoreError;

/// Storage contract a fixed-window rate limiting middleware relies on.
///
/// The store only keeps counters; deciding whether a client is over its
/// limit is the middleware's job.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Receive the window length. Must happen before the first
    /// `increment` or `decrement`.
    fn init(&self, options: WindowOptions) -> Result<(), StoreError>;

    /// Current hits for `key`, or `None` if no record exists.
    async fn get(&self, key: &str) -> Result<Option<ClientRateLimitInfo>, StoreError>;

    /// Add one hit and return the post-update state.
    async fn increment(&self, key: &str) -> Result<ClientRateLimitInfo, StoreError>;

    /// Remove one hit.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    /// Delete the record for `key`. Absent keys are not an error.
    async fn reset_key(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every record in the backing collection, whatever its prefix.
    async fn reset_all(&self) -> Result<(), StoreError>;

    /// Release resources the store owns.
    async fn shutdown(&self) -> Result<(), StoreError>;

    /// Namespace prepended to every key.
    fn prefix(&self) -> &str;
}
