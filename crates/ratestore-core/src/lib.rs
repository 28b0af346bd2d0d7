//! # Ratestore Core
//!
//! The domain layer of the rate limit store.
//! This crate holds the counter record model, the error taxonomy and the
//! ports that storage backends and rate limiting middleware meet at. It has
//! no database dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{ClientRateLimitInfo, CounterRecord, CounterUpdate, WindowOptions};
pub use error::StoreError;
