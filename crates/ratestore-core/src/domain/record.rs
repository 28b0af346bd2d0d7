use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted hit counter for one prefixed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    /// Prefixed key, unique within the collection.
    pub id: String,
    /// Hits in the current window. Not floored at zero.
    pub counter: i64,
    /// Instant after which the record is stale.
    pub expiration_date: DateTime<Utc>,
}

impl CounterRecord {
    /// Whether the record has passed its expiration at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// An atomic counter mutation: add `delta` to the record with `id`,
/// creating it with `counter = delta` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterUpdate {
    pub id: String,
    pub delta: i64,
    /// Expiration written on insert, and on every update when
    /// `refresh_expiration` is set.
    pub expires_at: DateTime<Utc>,
    pub refresh_expiration: bool,
}

/// What the rate limiting middleware sees for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRateLimitInfo {
    pub total_hits: i64,
    pub reset_time: DateTime<Utc>,
}

impl From<CounterRecord> for ClientRateLimitInfo {
    fn from(record: CounterRecord) -> Self {
        Self {
            total_hits: record.counter,
            reset_time: record.expiration_date,
        }
    }
}
