//! Core error types for Eddy operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.
//! Per-item errors never terminate a worker; [`Error::is_transient`] tells the
//! caller whether a retry can help.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Eddy operations.
#[derive(Debug, Error)]
pub enum Error {
    // Identity errors
    #[error("failed to compute key: {reason}")]
    KeyComputation { reason: String },

    #[error("invalid resource key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("failed to decode tombstone: {reason}")]
    TombstoneDecode { reason: String },

    // Cache errors
    #[error("cache lookup for '{key}' failed: {reason}")]
    CacheLookup { key: String, reason: String },

    // Resource source errors
    #[error("resource source error: {reason}")]
    Source { reason: String },

    #[error("watch resume version {version} is no longer available")]
    WatchExpired { version: u64 },

    // Parsing errors
    #[error("failed to parse manifest '{path}': {reason}")]
    ManifestParseFailed { path: PathBuf, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a key computation error.
    pub fn key_computation(reason: impl Into<String>) -> Self {
        Self::KeyComputation {
            reason: reason.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a tombstone decode error.
    pub fn tombstone_decode(reason: impl Into<String>) -> Self {
        Self::TombstoneDecode {
            reason: reason.into(),
        }
    }

    /// Create a cache lookup error.
    pub fn cache_lookup(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheLookup {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a resource source error.
    pub fn source(reason: impl Into<String>) -> Self {
        Self::Source {
            reason: reason.into(),
        }
    }

    /// Create a manifest parse error.
    pub fn manifest_parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether retrying the failed operation can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CacheLookup { .. } | Self::Source { .. } | Self::WatchExpired { .. } | Self::Io(_)
        )
    }
}

/// The standard Result type for Eddy operations.
pub type Result<T> = std::result::Result<T, Error>;
