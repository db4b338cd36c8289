//! Retry delay policies.
//!
//! A [`RateLimiter`] answers "how long should this key wait before its next
//! attempt". Per-key limiters remember failure history until [`RateLimiter::forget`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::QueueKey;

/// Decides how long a key waits before it is requeued.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the key's next attempt. Records one more failure.
    fn when(&self, key: &K) -> Duration;

    /// Clear the key's failure history.
    fn forget(&self, key: &K);

    /// Number of failures recorded for the key since the last `forget`.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Calculate exponential backoff duration: `base * 2^attempt`, capped at `max`.
#[must_use]
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key exponential backoff.
///
/// The first failure waits `base`, each following one doubles the delay up
/// to `max`. History resets only through `forget`.
pub struct ExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: QueueKey> ExponentialFailureRateLimiter<K> {
    /// Create a limiter with the given bounds.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for ExponentialFailureRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);
        calculate_backoff(attempt, self.base, self.max)
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Refill rates are clamped into this range.
const MIN_QPS: f64 = 0.001;
const MAX_QPS: f64 = 1e9;

/// Longest delay the bucket ever hands out.
const MAX_BUCKET_DELAY: Duration = Duration::from_secs(1000);

/// Overall token bucket shared by every key.
///
/// Bounds the total retry rate; it keeps no per-key history.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a bucket refilled at `qps` tokens per second holding at most `burst`.
    ///
    /// A `qps` that is NaN, zero, or negative refills at the slowest
    /// supported rate instead.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let qps = if qps.is_nan() || qps <= 0.0 {
            MIN_QPS
        } else {
            qps.clamp(MIN_QPS, MAX_QPS)
        };
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    fn reserve(&self) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.last = now;
        bucket.tokens = elapsed.mul_add(self.qps, bucket.tokens).min(self.burst) - 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps)
                .map_or(MAX_BUCKET_DELAY, |delay| delay.min(MAX_BUCKET_DELAY))
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Waits as long as the slowest of its children.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    /// Combine several limiters.
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        // Every child must observe the failure, so no short-circuiting.
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &K) {
        self.limiters.iter().for_each(|limiter| limiter.forget(key));
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// The stock controller limiter: per-key 5ms..1000s backoff plus 10 qps / 100 burst overall.
#[must_use]
pub fn default_controller_rate_limiter<K: QueueKey>() -> Box<dyn RateLimiter<K>> {
    crate::QueueConfig::default().rate_limiter()
}
