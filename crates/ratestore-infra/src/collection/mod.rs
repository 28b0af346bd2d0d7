//! Counter collection implementations - MongoDB and in-memory fallback.

mod memory;

pub use memory::InMemoryCounterCollection;

#[cfg(feature = "mongodb")]
pub(crate) mod mongo;
#[cfg(feature = "mongodb")]
pub use mongo::{CounterDocument, MongoCounterCollection};
