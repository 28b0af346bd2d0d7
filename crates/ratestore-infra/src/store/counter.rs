//! Fixed-window counter store over a lazily acquired collection.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use ratestore_core::ports::{CollectionConnector, CounterCollection, RateLimitStore};
use ratestore_core::{ClientRateLimitInfo, CounterRecord, CounterUpdate, StoreError, WindowOptions};

use super::builder::CounterStoreBuilder;
use crate::connection::ConnectionManager;
use crate::key::KeyPrefix;

/// Where a store gets its collection from.
pub enum CollectionSource {
    /// A handle the caller built and keeps ownership of.
    Collection(Arc<dyn CounterCollection>),
    /// A connector run on first use; the resulting connection is owned by
    /// the store.
    Connector(Arc<dyn CollectionConnector>),
}

/// Validated store configuration, usually produced by [`CounterStoreBuilder`].
pub struct StoreConfig {
    pub prefix: KeyPrefix,
    /// Refresh `expirationDate` on every change instead of only on insert.
    pub reset_expire_date_on_change: bool,
    pub source: CollectionSource,
}

/// Rate limit store keeping one counter record per prefixed key.
///
/// Mutations are single atomic upserts against the collection; the store
/// itself holds no locks around them.
pub struct CounterStore {
    connection: ConnectionManager,
    prefix: KeyPrefix,
    reset_expire_date_on_change: bool,
    /// Window length in milliseconds, 0 until `init`.
    window_ms: AtomicI64,
}

impl CounterStore {
    pub fn new(config: StoreConfig) -> Self {
        let connection = match config.source {
            CollectionSource::Collection(collection) => ConnectionManager::with_collection(collection),
            CollectionSource::Connector(connector) => ConnectionManager::new(connector),
        };

        Self {
            connection,
            prefix: config.prefix,
            reset_expire_date_on_change: config.reset_expire_date_on_change,
            window_ms: AtomicI64::new(0),
        }
    }

    pub fn builder() -> CounterStoreBuilder {
        CounterStoreBuilder::new()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn window(&self) -> Result<TimeDelta, StoreError> {
        let window_ms = self.window_ms.load(Ordering::Acquire);
        if window_ms == 0 {
            return Err(StoreError::Configuration(
                "store used before init; the window length is unknown".to_string(),
            ));
        }

        TimeDelta::try_milliseconds(window_ms).ok_or_else(|| {
            StoreError::Configuration(format!("window of {window_ms}ms is out of range"))
        })
    }

    async fn apply_delta(&self, key: &str, delta: i64) -> Result<CounterRecord, StoreError> {
        let window = self.window()?;
        let collection = self.connection.acquire().await?;

        let expires_at = Utc::now().checked_add_signed(window).ok_or_else(|| {
            StoreError::Configuration("window pushes expiration out of range".to_string())
        })?;

        collection
            .upsert_counter(CounterUpdate {
                id: self.prefix.apply(key),
                delta,
                expires_at,
                refresh_expiration: self.reset_expire_date_on_change,
            })
            .await
    }
}

#[async_trait]
impl RateLimitStore for CounterStore {
    fn init(&self, options: WindowOptions) -> Result<(), StoreError> {
        let window_ms = options.window_ms()?;
        self.window_ms.store(window_ms, Ordering::Release);
        tracing::debug!(window_ms, prefix = %self.prefix.as_str(), "Rate limit store initialized");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ClientRateLimitInfo>, StoreError> {
        let collection = self.connection.acquire().await?;
        let record = collection.find_counter(&self.prefix.apply(key)).await?;
        Ok(record.map(ClientRateLimitInfo::from))
    }

    async fn increment(&self, key: &str) -> Result<ClientRateLimitInfo, StoreError> {
        self.apply_delta(key, 1).await.map(ClientRateLimitInfo::from)
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        self.apply_delta(key, -1).await?;
        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<(), StoreError> {
        let collection = self.connection.acquire().await?;
        collection.delete_counter(&self.prefix.apply(key)).await
    }

    async fn reset_all(&self) -> Result<(), StoreError> {
        // Collection-wide: records under other prefixes go too.
        let collection = self.connection.acquire().await?;
        collection.delete_all().await
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.connection.shutdown().await
    }

    fn prefix(&self) -> &str {
        self.prefix.as_str()
    }
}
