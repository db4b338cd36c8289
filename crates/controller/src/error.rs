//! Error types for the controller crate.

use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller-level failures.
///
/// Per-item failures never surface here: they are retried, dead-lettered,
/// or dropped inside the worker pool.
#[derive(Debug, Error)]
pub enum Error {
    /// The stop signal fired before the cache completed its initial listing.
    #[error("stop signal received before the cache synced; no workers were started")]
    CacheSyncAborted,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Error raised by a lower layer.
    #[error(transparent)]
    Core(#[from] eddy_core::Error),
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
