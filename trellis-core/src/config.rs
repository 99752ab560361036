//! Runtime configuration.
//!
//! The defaults are generous enough that well-behaved programs never hit
//! them; the limits exist so that effects which keep re-queueing each other
//! surface as an error instead of spinning forever.

use serde::Deserialize;

use crate::error::Result;

/// Default bound on job-queue rounds within one flush.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 100;

/// Default bound on microtasks run by one checkpoint.
pub const DEFAULT_MAX_MICROTASKS: usize = 10_000;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// How many times a flush may pick up jobs queued while it was running.
    pub max_flush_rounds: usize,

    /// How many microtasks a single checkpoint may run.
    pub max_microtasks: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    ///
    /// ```
    /// use trellis_core::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::from_json(r#"{ "max_flush_rounds": 8 }"#).unwrap();
    /// assert_eq!(config.max_flush_rounds, 8);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds;
        self
    }

    pub fn with_max_microtasks(mut self, limit: usize) -> Self {
        self.max_microtasks = limit;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
            max_microtasks: DEFAULT_MAX_MICROTASKS,
        }
    }
}
