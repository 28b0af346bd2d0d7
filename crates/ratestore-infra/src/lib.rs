//! # Ratestore Infrastructure
//!
//! Concrete implementations of the ports defined in `ratestore-core`:
//! the counter store, lazy single-flight collection acquisition, and the
//! storage backends.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `mongodb` - MongoDB collections and connect-by-URI

pub mod collection;
pub mod connection;
pub mod connector;
pub mod key;
pub mod store;

// Re-exports - In-Memory
pub use collection::InMemoryCounterCollection;
pub use connection::{ConnectionManager, ConnectionStatus};
pub use connector::UriConfig;
pub use key::{DEFAULT_PREFIX, KeyPrefix};
pub use store::{CollectionSource, CounterStore, CounterStoreBuilder, StoreConfig};

// Re-exports - MongoDB
#[cfg(feature = "mongodb")]
pub use collection::{CounterDocument, MongoCounterCollection};
#[cfg(feature = "mongodb")]
pub use connector::{ClientOptionsHook, MongoConnector};
