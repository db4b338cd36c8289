//! Configuration for the list/watch loop.

use std::collections::BTreeMap;
use std::time::Duration;

use eddy_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::source::{ListOptions, WatchOptions};

/// Informer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformerConfig {
    /// First reconnect delay after a watch failure, in milliseconds.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Upper bound for the reconnect delay, in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Consecutive watch failures tolerated before falling back to a full relist.
    #[serde(default = "default_max_watch_failures")]
    pub max_watch_failures: u32,

    /// Randomize reconnect delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Only objects carrying all of these labels are observed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

const fn default_reconnect_base_ms() -> u64 {
    100
}

const fn default_reconnect_max_ms() -> u64 {
    30_000
}

const fn default_max_watch_failures() -> u32 {
    3
}

const fn default_jitter() -> bool {
    true
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_watch_failures: default_max_watch_failures(),
            jitter: default_jitter(),
            label_selector: BTreeMap::new(),
        }
    }
}

impl InformerConfig {
    /// Disable reconnect jitter, for deterministic timing.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Require a label on every observed object.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_selector.insert(key.into(), value.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a bound is zero or inverted.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_base_ms == 0 {
            return Err(Error::invalid_config(
                "informer.reconnect_base_ms must be greater than 0",
            ));
        }

        if self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(Error::invalid_config(
                "informer.reconnect_max_ms must be at least informer.reconnect_base_ms",
            ));
        }

        if self.max_watch_failures == 0 {
            return Err(Error::invalid_config(
                "informer.max_watch_failures must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponential = 2_u64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.reconnect_base_ms.checked_mul(factor))
            .unwrap_or(self.reconnect_max_ms);
        let capped = exponential.min(self.reconnect_max_ms);

        if self.jitter {
            let jitter_range = (capped / 4).max(1);
            let jitter = rand::random::<u64>() % (2 * jitter_range);
            Duration::from_millis(capped.saturating_add(jitter))
        } else {
            Duration::from_millis(capped)
        }
    }

    pub(crate) fn list_options(&self) -> ListOptions {
        ListOptions {
            label_selector: self.label_selector.clone(),
        }
    }

    pub(crate) fn watch_options(&self, resource_version: u64) -> WatchOptions {
        WatchOptions {
            resource_version,
            label_selector: self.label_selector.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_without_jitter() {
        let config = InformerConfig::default().without_jitter();

        assert_eq!(config.reconnect_delay(1), Duration::from_millis(100));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(400));
        assert_eq!(config.reconnect_delay(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_reconnect_delay_with_jitter_stays_near_cap() {
        let config = InformerConfig::default();

        for attempt in 1..20 {
            let delay = config.reconnect_delay(attempt);
            assert!(delay <= Duration::from_millis(30_000 + 15_000));
        }
    }

    #[test]
    fn test_validate_rejects_zero_failures() {
        let config = InformerConfig {
            max_watch_failures: 0,
            ..InformerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
