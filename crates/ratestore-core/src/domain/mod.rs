//! Domain entities - counter records and the window they live in.

mod record;
mod window;

pub use record::{ClientRateLimitInfo, CounterRecord, CounterUpdate};
pub use window::WindowOptions;
