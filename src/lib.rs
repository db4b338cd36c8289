//! # Eddy
//!
//! Runs the reconciliation controller from the `eddy-controller` crate
//! against a directory of manifests: every object in the directory is
//! listed, watched, and reconciled by a logging action.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod action;
pub mod cli;
pub mod config;
pub mod manifest;
pub mod signal;

pub use action::LoggingReconciler;
pub use config::AppConfig;
pub use manifest::{ManifestDirSource, ScanReport};
