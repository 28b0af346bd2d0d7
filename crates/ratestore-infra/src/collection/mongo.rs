//! MongoDB counter collection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, Document, doc};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use ratestore_core::ports::CounterCollection;
use ratestore_core::{CounterRecord, CounterUpdate, StoreError};

/// Field the TTL index is built on.
pub(crate) const EXPIRATION_FIELD: &str = "expirationDate";

/// Counter record as stored in MongoDB.
///
/// `expirationDate` is a BSON date so a TTL index can act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub counter: i64,
    #[serde(rename = "expirationDate")]
    pub expiration_date: bson::DateTime,
}

impl TryFrom<CounterDocument> for CounterRecord {
    type Error = StoreError;

    fn try_from(document: CounterDocument) -> Result<Self, Self::Error> {
        let millis = document.expiration_date.timestamp_millis();
        let expiration_date = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            StoreError::Operation(format!(
                "record {} has unrepresentable expiration {millis}",
                document.id
            ))
        })?;

        Ok(Self {
            id: document.id,
            counter: document.counter,
            expiration_date,
        })
    }
}

/// Counter collection backed by a MongoDB collection.
///
/// When built by the connector it also owns the client and closes it on
/// [`CounterCollection::close`]. A collection passed in by the caller is
/// never closed here.
pub struct MongoCounterCollection {
    collection: Collection<CounterDocument>,
    client: Option<Client>,
}

impl MongoCounterCollection {
    /// Wrap a caller-owned collection of any document type.
    pub fn new<T: Send + Sync>(collection: Collection<T>) -> Self {
        Self {
            collection: collection.clone_with_type(),
            client: None,
        }
    }

    pub(crate) fn owned(client: Client, collection: Collection<CounterDocument>) -> Self {
        Self {
            collection,
            client: Some(client),
        }
    }

    pub fn collection(&self) -> &Collection<CounterDocument> {
        &self.collection
    }
}

/// `$inc` the counter; write the expiration with `$set` when it should be
/// refreshed on every change, `$setOnInsert` otherwise.
pub(crate) fn update_document(update: &CounterUpdate) -> Document {
    let expiration = bson::DateTime::from_millis(update.expires_at.timestamp_millis());
    let expiration_operator = if update.refresh_expiration {
        "$set"
    } else {
        "$setOnInsert"
    };

    let mut document = doc! { "$inc": { "counter": update.delta } };
    document.insert(expiration_operator, doc! { "expirationDate": expiration });
    document
}

fn operation_error(error: mongodb::error::Error) -> StoreError {
    StoreError::Operation(error.to_string())
}

#[async_trait]
impl CounterCollection for MongoCounterCollection {
    async fn upsert_counter(&self, update: CounterUpdate) -> Result<CounterRecord, StoreError> {
        let document = self
            .collection
            .find_one_and_update(doc! { "_id": update.id.as_str() }, update_document(&update))
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(operation_error)?
            .ok_or_else(|| {
                StoreError::Operation(format!("upsert of {} returned no document", update.id))
            })?;

        document.try_into()
    }

    async fn find_counter(&self, id: &str) -> Result<Option<CounterRecord>, StoreError> {
        self.collection
            .find_one(doc! { "_id": id })
            .await
            .map_err(operation_error)?
            .map(CounterRecord::try_from)
            .transpose()
    }

    async fn delete_counter(&self, id: &str) -> Result<(), StoreError> {
        self.collection
            .delete_one(doc! { "_id": id })
            .await
            .map_err(operation_error)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let result = self
            .collection
            .delete_many(doc! {})
            .await
            .map_err(operation_error)?;
        tracing::debug!(
            collection = %self.collection.name(),
            deleted = result.deleted_count,
            "Cleared counter collection"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(client) = &self.client {
            client.clone().shutdown().await;
        }
        Ok(())
    }
}
