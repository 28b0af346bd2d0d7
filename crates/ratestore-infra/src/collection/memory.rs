//! In-memory counter collection - used as fallback when MongoDB is unavailable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use ratestore_core::ports::CounterCollection;
use ratestore_core::{CounterRecord, CounterUpdate, StoreError};

/// Counter records in a HashMap behind an async RwLock.
///
/// Every upsert runs under the write lock, which makes it atomic per id.
/// Note: Data is lost on process restart and is not shared across instances.
pub struct InMemoryCounterCollection {
    records: RwLock<HashMap<String, CounterRecord>>,
    ttl_sweep: bool,
}

impl InMemoryCounterCollection {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl_sweep: false,
        }
    }

    /// Treat records past their expiration as deleted, the way a
    /// zero-grace TTL index would.
    pub fn with_ttl_sweep() -> Self {
        Self {
            ttl_sweep: true,
            ..Self::new()
        }
    }

    /// Drop every expired record now, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryCounterCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterCollection for InMemoryCounterCollection {
    async fn upsert_counter(&self, update: CounterUpdate) -> Result<CounterRecord, StoreError> {
        let mut records = self.records.write().await;

        if self.ttl_sweep {
            let now = Utc::now();
            if records.get(&update.id).is_some_and(|r| r.is_expired_at(now)) {
                records.remove(&update.id);
            }
        }

        match records.get_mut(&update.id) {
            Some(record) => {
                record.counter = record.counter.checked_add(update.delta).ok_or_else(|| {
                    StoreError::Operation(format!("counter overflow for {}", update.id))
                })?;
                if update.refresh_expiration {
                    record.expiration_date = update.expires_at;
                }
                Ok(record.clone())
            }
            None => {
                let record = CounterRecord {
                    id: update.id.clone(),
                    counter: update.delta,
                    expiration_date: update.expires_at,
                };
                records.insert(update.id, record.clone());
                Ok(record)
            }
        }
    }

    async fn find_counter(&self, id: &str) -> Result<Option<CounterRecord>, StoreError> {
        let records = self.records.read().await;
        let record = records.get(id).cloned();

        if self.ttl_sweep {
            let now = Utc::now();
            return Ok(record.filter(|r| !r.is_expired_at(now)));
        }

        Ok(record)
    }

    async fn delete_counter(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}
