//! Storage-facing ports.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CounterRecord, CounterUpdate};
use crate::error::StoreError;

/// A live handle to the collection holding counter records.
///
/// Implementations must apply [`CounterUpdate`]s atomically per id: the
/// increment and the optional insert happen as one step, and the returned
/// record is the post-update image.
#[async_trait]
pub trait CounterCollection: Send + Sync {
    /// Atomic find-and-update with upsert, returning the new record.
    async fn upsert_counter(&self, update: CounterUpdate) -> Result<CounterRecord, StoreError>;

    /// Point lookup by id.
    async fn find_counter(&self, id: &str) -> Result<Option<CounterRecord>, StoreError>;

    /// Delete the record with `id`, if any.
    async fn delete_counter(&self, id: &str) -> Result<(), StoreError>;

    /// Delete every record in the collection.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Close the underlying connection. Handles that do not own their
    /// connection leave this as a no-op.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Establishes a connection and prepares the counter collection.
///
/// Called at most once per in-flight acquisition; see the connection
/// manager in `ratestore-infra`.
#[async_trait]
pub trait CollectionConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn CounterCollection>, StoreError>;
}
