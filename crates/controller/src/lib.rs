//! Eddy controller: key-based reconciliation on top of an informer.
//!
//! Cache notifications are translated into [`eddy_core::ResourceKey`]s and
//! pushed onto a deduplicating work queue. A fixed pool of workers pulls keys,
//! reads the current cached state, and calls the [`Reconcile`] action:
//!
//! - success forgets the key's failure history
//! - a retryable failure requeues it with per-key exponential backoff
//! - a permanent failure, or exhausting `max_retries`, drops it
//!
//! Workers only start once the cache has synced, and a stop drains the queue
//! before [`Controller::run`] returns.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use eddy_controller::{Controller, ControllerConfig, ReconcileRequest, reconcile_fn};
//! use eddy_informer::MemorySource;
//!
//! let source = Arc::new(MemorySource::new());
//! let action = reconcile_fn(|req: ReconcileRequest| async move {
//!     tracing::info!(key = %req.key, exists = req.exists, "reconciling");
//!     Ok(())
//! });
//! let controller = Controller::new(source, Arc::new(action), ControllerConfig::default())?;
//! let stop = controller.stop_handle();
//! // stop.stop() from a signal handler
//! let summary = controller.run(2).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod action;
pub mod config;
pub mod controller;
pub mod error;
mod stats;
pub mod translator;
pub mod worker;

pub use action::{FnReconciler, Reconcile, ReconcileError, ReconcileRequest, reconcile_fn};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerState, RunSummary, StopHandle};
pub use error::{Error, Result};
pub use stats::ControllerStats;
pub use translator::EventTranslator;
pub use worker::WorkerContext;
