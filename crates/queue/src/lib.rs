//! # Eddy Queue
//!
//! Work queue feeding the controller's workers.
//!
//! - **Dedup**: a key is pending at most once; re-adds collapse into one slot.
//! - **In-flight tracking**: a key handed to a worker is never handed to a
//!   second worker; re-adds during processing are redelivered after `done`.
//! - **Rate-limited requeue**: failed keys come back after a per-key
//!   exponential backoff bounded by an overall token bucket.
//! - **Drain on shutdown**: pending keys are still handed out after
//!   `shut_down`; `get` reports shutdown only once the queue is empty.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt::Debug;
use std::hash::Hash;

pub mod config;
pub mod queue;
pub mod rate_limiter;

pub use config::QueueConfig;
pub use queue::{QueueMetrics, WorkQueue};
pub use rate_limiter::{
    BucketRateLimiter, ExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    calculate_backoff, default_controller_rate_limiter,
};

/// Bounds every queue key satisfies.
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
