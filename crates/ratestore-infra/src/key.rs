//! Key namespacing for records that share a collection.

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "mongodb_rl_";

/// Maps caller keys to record ids by plain concatenation.
///
/// There is no escaping: `("ab", "c")` and `("a", "bc")` produce the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Record id for a caller-supplied key.
    pub fn apply(&self, key: &str) -> String {
        let mut id = String::with_capacity(self.0.len() + key.len());
        id.push_str(&self.0);
        id.push_str(key);
        id
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
