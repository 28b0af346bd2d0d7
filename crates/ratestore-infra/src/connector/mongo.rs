//! MongoDB connector: connect by URI and prepare the counter collection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, Credential, IndexOptions};
use mongodb::{Client, IndexModel};

use ratestore_core::StoreError;
use ratestore_core::ports::{CollectionConnector, CounterCollection};

use super::uri::{DEFAULT_DATABASE, UriConfig};
use crate::collection::{CounterDocument, MongoCounterCollection};
use crate::collection::mongo::EXPIRATION_FIELD;

/// Caller-supplied adjustment of the driver options. Runs after every
/// computed setting, so it can override any of them.
pub type ClientOptionsHook = Arc<dyn Fn(&mut ClientOptions) + Send + Sync>;

/// Connects to MongoDB and hands out an owned [`MongoCounterCollection`].
pub struct MongoConnector {
    config: UriConfig,
    options_hook: Option<ClientOptionsHook>,
}

impl MongoConnector {
    pub fn new(config: UriConfig) -> Self {
        Self {
            config,
            options_hook: None,
        }
    }

    pub fn with_options_hook(mut self, hook: ClientOptionsHook) -> Self {
        self.options_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &UriConfig {
        &self.config
    }

    /// Driver options, layered lowest to highest: computed defaults, the
    /// explicit auth source, explicit credentials, then the caller's hook.
    pub async fn client_options(&self) -> Result<ClientOptions, StoreError> {
        let mut options = ClientOptions::parse(self.config.uri.as_str())
            .await
            .map_err(connection_error)?;

        self.apply_settings(&mut options);
        Ok(options)
    }

    fn apply_settings(&self, options: &mut ClientOptions) {
        if options.connect_timeout.is_none() {
            options.connect_timeout = Some(self.config.connect_timeout);
        }
        if options.server_selection_timeout.is_none() {
            options.server_selection_timeout = Some(self.config.connect_timeout);
        }

        let auth_source = self.config.resolved_auth_source();
        if let Some(user) = &self.config.user {
            let mut credential = Credential::default();
            credential.username = Some(user.clone());
            credential.password = self.config.password.clone();
            credential.source = auth_source;
            options.credential = Some(credential);
        } else if let Some(credential) = options.credential.as_mut() {
            if self.config.auth_source.is_some() || credential.source.is_none() {
                credential.source = auth_source;
            }
        }

        if let Some(hook) = &self.options_hook {
            hook(options);
        }
    }
}

fn connection_error(error: mongodb::error::Error) -> StoreError {
    StoreError::Connection(error.to_string())
}

#[async_trait]
impl CollectionConnector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn CounterCollection>, StoreError> {
        let options = self.client_options().await?;
        let client = Client::with_options(options).map_err(connection_error)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        // The driver connects lazily; ping so failures surface here.
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_error)?;

        tracing::info!(
            database = %database.name(),
            collection = %self.config.collection_name,
            "Connected to MongoDB rate limit store"
        );

        let collection = database.collection::<CounterDocument>(&self.config.collection_name);

        if self.config.create_ttl_index {
            let mut keys = Document::new();
            keys.insert(EXPIRATION_FIELD, 1);
            let index = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                )
                .build();

            collection
                .create_index(index)
                .await
                .map_err(connection_error)?;
            tracing::info!(collection = %collection.name(), "TTL index ensured");
        } else {
            tracing::debug!(collection = %collection.name(), "TTL index creation disabled");
        }

        Ok(Arc::new(MongoCounterCollection::owned(client, collection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeDelta, Utc};
    use ratestore_core::CounterUpdate;

    /// Apply the connector's settings on top of freshly parsed options,
    /// optionally carrying a user embedded in the URI.
    fn options_for(connector: &MongoConnector, embedded_user: Option<&str>) -> ClientOptions {
        let mut options = ClientOptions::default();
        if let Some(user) = embedded_user {
            let mut credential = Credential::default();
            credential.username = Some(user.to_string());
            options.credential = Some(credential);
        }
        connector.apply_settings(&mut options);
        options
    }

    #[test]
    fn test_computed_defaults() {
        let connector = MongoConnector::new(UriConfig::new("mongodb://localhost:27017/limits"));
        let options = options_for(&connector, None);

        assert_eq!(options.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(5)));
        assert!(options.credential.is_none());
    }

    #[test]
    fn test_explicit_user_gets_derived_auth_source() {
        let mut config = UriConfig::new("mongodb://localhost:27017/limits?w=majority");
        config.user = Some("app".to_string());
        config.password = Some("secret".to_string());
        let connector = MongoConnector::new(config);

        let credential = options_for(&connector, None).credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("app"));
        assert_eq!(credential.password.as_deref(), Some("secret"));
        assert_eq!(credential.source.as_deref(), Some("limits"));
    }

    #[test]
    fn test_auth_source_override_applies_to_embedded_credentials() {
        let mut config = UriConfig::new("mongodb://embedded:pw@localhost:27017/limits");
        config.auth_source = Some("admin".to_string());
        let connector = MongoConnector::new(config);

        let credential = options_for(&connector, Some("embedded")).credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("embedded"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[test]
    fn test_hook_overrides_everything() {
        let mut config = UriConfig::new("mongodb://localhost:27017/limits");
        config.user = Some("app".to_string());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let connector = MongoConnector::new(config).with_options_hook(Arc::new(move |options: &mut ClientOptions| {
            seen.fetch_add(1, Ordering::SeqCst);
            options.connect_timeout = Some(Duration::from_millis(250));
            if let Some(credential) = options.credential.as_mut() {
                credential.source = Some("$external".to_string());
            }
        }));

        let options = options_for(&connector, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(options.connect_timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            options.credential.unwrap().source.as_deref(),
            Some("$external")
        );
    }

    async fn get_test_connector(
        create_ttl_index: bool,
    ) -> Option<(MongoConnector, Arc<dyn CounterCollection>)> {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let uri = std::env::var("MONGO_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27018/ratestore_test".to_string());
        let mut config = UriConfig::new(uri);
        config.collection_name = format!("counters_{}", uuid::Uuid::new_v4().simple());
        config.connect_timeout = Duration::from_secs(1);
        config.create_ttl_index = create_ttl_index;

        let connector = MongoConnector::new(config);
        let collection = connector.connect().await.ok()?;
        Some((connector, collection))
    }

    async fn raw_collection(connector: &MongoConnector) -> mongodb::Collection<Document> {
        let client = Client::with_options(connector.client_options().await.unwrap()).unwrap();
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        database.collection::<Document>(&connector.config().collection_name)
    }

    #[tokio::test]
    async fn test_mongo_upsert_and_ttl_index() {
        let (connector, collection) = match get_test_connector(true).await {
            Some(pair) => pair,
            None => {
                tracing::warn!("MongoDB not available, skipping test");
                return;
            }
        };

        let first = Utc::now() + TimeDelta::seconds(60);
        let update = |delta, expires_at, refresh_expiration| CounterUpdate {
            id: "mongodb_rl_k".to_string(),
            delta,
            expires_at,
            refresh_expiration,
        };

        let record = collection.upsert_counter(update(1, first, false)).await.unwrap();
        assert_eq!(record.counter, 1);
        assert_eq!(record.expiration_date.timestamp_millis(), first.timestamp_millis());

        let later = first + TimeDelta::seconds(30);
        let record = collection.upsert_counter(update(1, later, false)).await.unwrap();
        assert_eq!(record.counter, 2);
        assert_eq!(record.expiration_date.timestamp_millis(), first.timestamp_millis());

        let record = collection.upsert_counter(update(-1, later, true)).await.unwrap();
        assert_eq!(record.counter, 1);
        assert_eq!(record.expiration_date.timestamp_millis(), later.timestamp_millis());

        let raw = raw_collection(&connector).await;
        let indexes = raw.list_index_names().await.unwrap();
        assert!(indexes.iter().any(|name| name == "expirationDate_1"));

        collection.delete_all().await.unwrap();
        assert_eq!(collection.find_counter("mongodb_rl_k").await.unwrap(), None);

        raw.drop().await.unwrap();
        collection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_mongo_ttl_index_can_be_disabled() {
        let (connector, collection) = match get_test_connector(false).await {
            Some(pair) => pair,
            None => {
                tracing::warn!("MongoDB not available, skipping test");
                return;
            }
        };

        // The first write creates the collection, so its indexes can be listed.
        let record = collection
            .upsert_counter(CounterUpdate {
                id: "mongodb_rl_k".to_string(),
                delta: 1,
                expires_at: Utc::now() + TimeDelta::seconds(60),
                refresh_expiration: false,
            })
            .await
            .unwrap();
        assert_eq!(record.counter, 1);

        let raw = raw_collection(&connector).await;
        let indexes = raw.list_index_names().await.unwrap();
        assert!(indexes.iter().any(|name| name == "_id_"));
        assert!(!indexes.iter().any(|name| name == "expirationDate_1"));

        raw.drop().await.unwrap();
        collection.close().await.unwrap();
    }
}
