//! Configuration for work queues.

use std::time::Duration;

use eddy_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::rate_limiter::{
    BucketRateLimiter, ExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
};
use crate::QueueKey;

/// Work queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Delay for a key's first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a key's retry delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Sustained retries per second across all keys.
    #[serde(default = "default_bucket_qps")]
    pub bucket_qps: f64,

    /// Retry burst allowed across all keys.
    #[serde(default = "default_bucket_burst")]
    pub bucket_burst: u32,
}

fn default_name() -> String {
    "resources".to_string()
}

const fn default_base_delay_ms() -> u64 {
    5
}

const fn default_max_delay_ms() -> u64 {
    1_000_000
}

const fn default_bucket_qps() -> f64 {
    10.0
}

const fn default_bucket_burst() -> u32 {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            bucket_qps: default_bucket_qps(),
            bucket_burst: default_bucket_burst(),
        }
    }
}

impl QueueConfig {
    /// Create a queue config with defaults and the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set per-key backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self.max_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a bound is zero or inverted.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::invalid_config("queue.base_delay_ms must be greater than 0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::invalid_config(
                "queue.max_delay_ms must be at least queue.base_delay_ms",
            ));
        }

        if !(self.bucket_qps.is_finite() && self.bucket_qps > 0.0) {
            return Err(Error::invalid_config("queue.bucket_qps must be a positive number"));
        }

        if self.bucket_burst == 0 {
            return Err(Error::invalid_config("queue.bucket_burst must be greater than 0"));
        }

        Ok(())
    }

    /// Per-key exponential backoff combined with an overall token bucket.
    #[must_use]
    pub fn rate_limiter<K: QueueKey>(&self) -> Box<dyn RateLimiter<K>> {
        Box::new(MaxOfRateLimiter::new(vec![
            Box::new(ExponentialFailureRateLimiter::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )),
            Box::new(BucketRateLimiter::new(self.bucket_qps, self.bucket_burst)),
        ]))
    }
}
