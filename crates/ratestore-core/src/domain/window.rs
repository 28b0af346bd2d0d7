use std::time::Duration;

use chrono::TimeDelta;

use crate::error::StoreError;

/// Window configuration handed to the store by the middleware at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    /// Length of one fixed window.
    pub window: Duration,
}

impl WindowOptions {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_millis(window_ms: u64) -> Self {
        Self::new(Duration::from_millis(window_ms))
    }

    /// Window length in whole milliseconds, rejecting empty and
    /// unrepresentable windows.
    pub fn window_ms(&self) -> Result<i64, StoreError> {
        let millis = i64::try_from(self.window.as_millis()).map_err(|_| {
            StoreError::Configuration(format!("window {:?} is out of range", self.window))
        })?;

        if millis <= 0 {
            return Err(StoreError::Configuration(
                "window must be at least one millisecond".to_string(),
            ));
        }

        TimeDelta::try_milliseconds(millis)
            .map(|_| millis)
            .ok_or_else(|| {
                StoreError::Configuration(format!("window {:?} is out of range", self.window))
            })
    }
}
