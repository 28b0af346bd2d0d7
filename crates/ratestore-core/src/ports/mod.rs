//! Ports - trait definitions for external dependencies.
//! Middleware talks to a [`RateLimitStore`]; stores talk to a
//! [`CounterCollection`], reached through a [`CollectionConnector`].

mod collection;
mod store;

pub use collection::{CollectionConnector, CounterCollection};
pub use store::RateLimitStore;
