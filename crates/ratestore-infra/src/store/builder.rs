//! Store construction and environment configuration.

use std::sync::Arc;
use std::time::Duration;

use ratestore_core::ports::{CollectionConnector, CounterCollection, RateLimitStore};
use ratestore_core::{StoreError, WindowOptions};

use super::counter::{CollectionSource, CounterStore, StoreConfig};
use crate::connector::UriConfig;
use crate::key::KeyPrefix;

#[cfg(feature = "mongodb")]
use crate::connector::{ClientOptionsHook, MongoConnector};

/// Builds a [`CounterStore`] from one of three collection sources: URI
/// settings, a ready collection handle, or a custom connector.
///
/// # Example
/// ```ignore
/// let store = CounterStore::builder()
///     .uri("mongodb://localhost:27017/ratelimits")
///     .collection_name("hits")
///     .window(WindowOptions::from_millis(60_000))
///     .build()?;
/// ```
#[derive(Default)]
pub struct CounterStoreBuilder {
    prefix: Option<String>,
    reset_expire_date_on_change: bool,
    create_ttl_index: Option<bool>,
    window: Option<WindowOptions>,

    uri_fields: UriFields,
    #[cfg(feature = "mongodb")]
    options_hook: Option<ClientOptionsHook>,

    collection: Option<Arc<dyn CounterCollection>>,
    connector: Option<Arc<dyn CollectionConnector>>,
}

impl CounterStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load settings through `var`, which maps a variable name to its value.
    /// Unparseable values are ignored.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            prefix: var("RATE_LIMIT_PREFIX"),
            reset_expire_date_on_change: var("RATE_LIMIT_RESET_EXPIRE_ON_CHANGE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            create_ttl_index: var("RATE_LIMIT_CREATE_TTL_INDEX").map(|v| v != "false" && v != "0"),
            window: var("RATE_LIMIT_WINDOW_MS")
                .and_then(|s| s.parse().ok())
                .map(WindowOptions::from_millis),
            uri_fields: UriFields {
                uri: var("MONGO_URI"),
                collection_name: var("MONGO_COLLECTION"),
                user: var("MONGO_USER"),
                password: var("MONGO_PASSWORD"),
                auth_source: var("MONGO_AUTH_SOURCE"),
                connect_timeout: var("MONGO_CONNECT_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs),
            },
            ..Self::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn reset_expire_date_on_change(mut self, enabled: bool) -> Self {
        self.reset_expire_date_on_change = enabled;
        self
    }

    /// Whether connecting by URI also ensures the TTL index. Defaults to true.
    pub fn create_ttl_index(mut self, enabled: bool) -> Self {
        self.create_ttl_index = Some(enabled);
        self
    }

    /// Initialize the window at construction instead of through `init`.
    pub fn window(mut self, options: WindowOptions) -> Self {
        self.window = Some(options);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri_fields.uri = Some(uri.into());
        self
    }

    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.uri_fields.collection_name = Some(name.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.uri_fields.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.uri_fields.password = Some(password.into());
        self
    }

    pub fn auth_source(mut self, auth_source: impl Into<String>) -> Self {
        self.uri_fields.auth_source = Some(auth_source.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.uri_fields.connect_timeout = Some(timeout);
        self
    }

    /// Adjust the driver options last, overriding anything computed.
    #[cfg(feature = "mongodb")]
    pub fn connection_options(mut self, hook: ClientOptionsHook) -> Self {
        self.options_hook = Some(hook);
        self
    }

    /// Use a collection the caller owns. Exclusive with the URI settings.
    pub fn collection(mut self, collection: Arc<dyn CounterCollection>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Acquire the collection through a custom connector on first use.
    pub fn connector(mut self, connector: Arc<dyn CollectionConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    fn has_uri_settings(&self) -> bool {
        #[cfg(feature = "mongodb")]
        let hook = self.options_hook.is_some();
        #[cfg(not(feature = "mongodb"))]
        let hook = false;

        self.uri_fields.is_set() || hook
    }

    /// Resolve the settings into a [`StoreConfig`] without initializing.
    pub fn into_config(self) -> Result<StoreConfig, StoreError> {
        let shapes = [
            self.has_uri_settings(),
            self.collection.is_some(),
            self.connector.is_some(),
        ];
        match shapes.iter().filter(|given| **given).count() {
            0 => {
                return Err(StoreError::Configuration(
                    "either a uri or a collection is required".to_string(),
                ));
            }
            1 => {}
            _ => {
                return Err(StoreError::Configuration(
                    "uri settings, a collection and a connector are mutually exclusive".to_string(),
                ));
            }
        }

        let prefix = self.prefix.map(KeyPrefix::new).unwrap_or_default();
        let reset_expire_date_on_change = self.reset_expire_date_on_change;

        let source = if let Some(collection) = self.collection {
            CollectionSource::Collection(collection)
        } else if let Some(connector) = self.connector {
            CollectionSource::Connector(connector)
        } else {
            let uri_config = self.uri_fields.into_config(self.create_ttl_index)?;

            #[cfg(feature = "mongodb")]
            let source = uri_source(uri_config, self.options_hook)?;
            #[cfg(not(feature = "mongodb"))]
            let source = uri_source(uri_config)?;

            source
        };

        Ok(StoreConfig {
            prefix,
            reset_expire_date_on_change,
            source,
        })
    }

    /// Build the store, running `init` when a window was given.
    pub fn build(self) -> Result<CounterStore, StoreError> {
        let window = self.window;
        let store = CounterStore::new(self.into_config()?);

        if let Some(options) = window {
            store.init(options)?;
        }

        Ok(store)
    }
}

/// Settings of the URI shape, collected before validation.
#[derive(Debug, Default)]
struct UriFields {
    uri: Option<String>,
    collection_name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    auth_source: Option<String>,
    connect_timeout: Option<Duration>,
}

impl UriFields {
    fn is_set(&self) -> bool {
        self.uri.is_some()
            || self.collection_name.is_some()
            || self.user.is_some()
            || self.password.is_some()
            || self.auth_source.is_some()
            || self.connect_timeout.is_some()
    }

    fn into_config(self, create_ttl_index: Option<bool>) -> Result<UriConfig, StoreError> {
        let uri = self
            .uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| StoreError::Configuration("uri is required".to_string()))?;

        if self.password.is_some() && self.user.is_none() {
            return Err(StoreError::Configuration(
                "password given without user".to_string(),
            ));
        }

        let mut config = UriConfig::new(uri);
        if let Some(name) = self.collection_name {
            if name.is_empty() {
                return Err(StoreError::Configuration(
                    "collection name must not be empty".to_string(),
                ));
            }
            config.collection_name = name;
        }
        config.user = self.user;
        config.password = self.password;
        config.auth_source = self.auth_source;
        if let Some(enabled) = create_ttl_index {
            config.create_ttl_index = enabled;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }

        Ok(config)
    }
}

#[cfg(feature = "mongodb")]
fn uri_source(
    uri_config: UriConfig,
    hook: Option<ClientOptionsHook>,
) -> Result<CollectionSource, StoreError> {
    let mut connector = MongoConnector::new(uri_config);
    if let Some(hook) = hook {
        connector = connector.with_options_hook(hook);
    }
    Ok(CollectionSource::Connector(Arc::new(connector)))
}

#[cfg(not(feature = "mongodb"))]
fn uri_source(_uri_config: UriConfig) -> Result<CollectionSource, StoreError> {
    Err(StoreError::Configuration(
        "connecting by uri requires the `mongodb` feature".to_string(),
    ))
}
