//! Controller configuration.

use eddy_informer::InformerConfig;
use eddy_queue::QueueConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Failed attempts allowed per key before it is dead-lettered.
    /// `None` retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Work queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// List/watch settings.
    #[serde(default)]
    pub informer: InformerConfig,
}

const fn default_workers() -> usize {
    2
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: None,
            queue: QueueConfig::default(),
            informer: InformerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Cap retries per key.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Replace the queue settings.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the informer settings.
    #[must_use]
    pub fn with_informer(mut self, informer: InformerConfig) -> Self {
        self.informer = informer;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the worker count is zero, or the
    /// queue or informer section is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }

        self.queue.validate()?;
        self.informer.validate()?;

        Ok(())
    }
}
