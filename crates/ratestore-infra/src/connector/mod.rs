//! Collection connectors - how a store reaches its collection on first use.

mod uri;

pub use uri::{DEFAULT_COLLECTION_NAME, DEFAULT_DATABASE, UriConfig, default_auth_source};

#[cfg(feature = "mongodb")]
mod mongo;
#[cfg(feature = "mongodb")]
pub use mongo::{ClientOptionsHook, MongoConnector};
