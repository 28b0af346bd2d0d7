//! Counter store - the [`RateLimitStore`](ratestore_core::ports::RateLimitStore)
//! implementation and its construction.

mod builder;
mod counter;

pub use builder::CounterStoreBuilder;
pub use counter::{CollectionSource, CounterStore, StoreConfig};
