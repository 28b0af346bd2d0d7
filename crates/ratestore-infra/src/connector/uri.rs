//! URI-shaped connection settings.

use std::time::Duration;

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION_NAME: &str = "expressRateRecords";

/// Database used when the URI names none.
pub const DEFAULT_DATABASE: &str = "test";

/// Settings for connecting by URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriConfig {
    /// Connection string, e.g. `mongodb://localhost:27017/ratelimits`.
    pub uri: String,
    pub collection_name: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Overrides the auth source derived from the URI path.
    pub auth_source: Option<String>,
    /// Build a zero-grace TTL index on the expiration field.
    pub create_ttl_index: bool,
    /// Applied to connect and server selection unless the URI sets them.
    pub connect_timeout: Duration,
}

impl UriConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            user: None,
            password: None,
            auth_source: None,
            create_ttl_index: true,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Auth source to use: the explicit override, else the URI's database.
    pub fn resolved_auth_source(&self) -> Option<String> {
        self.auth_source
            .clone()
            .or_else(|| default_auth_source(&self.uri))
    }
}

/// Database named by the last path segment of a connection string, with
/// the query string stripped. `None` when the URI has no path.
pub fn default_auth_source(uri: &str) -> Option<String> {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (_, path) = after_scheme.split_once('/')?;
    let name = path.rsplit('/').next().unwrap_or(path);

    (!name.is_empty()).then(|| name.to_string())
}
