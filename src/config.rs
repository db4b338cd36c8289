//! Effective settings for the `eddy` binary.
//!
//! Resolution order: built-in defaults, then the TOML file, then CLI flags.
//!
//! ```toml
//! workers = 4
//! max_retries = 10
//! work_ms = 250
//!
//! [queue]
//! base_delay_ms = 5
//! max_delay_ms = 60000
//!
//! [informer]
//! max_watch_failures = 3
//! ```

use std::path::Path;

use eddy_controller::ControllerConfig;
use eddy_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// Everything `eddy run` needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Simulated work per item, in milliseconds.
    #[serde(default = "default_work_ms")]
    pub work_ms: u64,

    #[serde(flatten)]
    pub controller: ControllerConfig,
}

const fn default_work_ms() -> u64 {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_ms: default_work_ms(),
            controller: ControllerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the text is not valid TOML or does
    /// not describe a valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.controller.validate().map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(config)
    }

    /// Load from `path`, or use the defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::InvalidConfig` if it does not parse or validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, args: &RunArgs) -> Self {
        if let Some(workers) = args.workers {
            self.controller.workers = workers;
        }
        if let Some(work_ms) = args.work_ms {
            self.work_ms = work_ms;
        }
        if args.max_retries.is_some() {
            self.controller.max_retries = args.max_retries;
        }
        self
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::invalid_config(e.to_string()))
    }
}
