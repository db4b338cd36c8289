//! Dedup work queue with in-flight tracking and rate-limited requeue.
//!
//! A key occupies at most one slot across pending and in-flight. Adding a key
//! that is already pending is a no-op; adding a key that is in flight marks it
//! dirty so it is redelivered exactly once after [`WorkQueue::done`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::QueueKey;
use crate::config::QueueConfig;
use crate::rate_limiter::RateLimiter;

/// Point-in-time view of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    /// Keys ready to be handed out.
    pub depth: usize,
    /// Keys currently held by a consumer.
    pub in_flight: usize,
    /// Keys waiting on a requeue delay.
    pub waiting: usize,
    /// Keys accepted by `add` (deduplicated adds are not counted).
    pub adds: u64,
    /// Calls to `add_rate_limited`.
    pub retries: u64,
}

#[derive(Debug)]
struct QueueState<K> {
    /// Ready keys in delivery order.
    queue: VecDeque<K>,
    /// Keys that need processing (pending, or re-added while in flight).
    dirty: HashSet<K>,
    /// Keys handed to a consumer and not yet done.
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Shared<K> {
    name: String,
    state: Mutex<QueueState<K>>,
    item_ready: Notify,
    idle: Notify,
    shutdown_tx: watch::Sender<bool>,
    adds: AtomicU64,
    retries: AtomicU64,
    waiting: AtomicUsize,
}

impl<K: QueueKey> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, key: K) {
        let mut state = self.lock();

        if state.shutting_down {
            trace!(queue = %self.name, key = ?key, "Add after shutdown ignored");
            return;
        }

        if !state.dirty.insert(key.clone()) {
            trace!(queue = %self.name, key = ?key, "Key already pending, deduplicated");
            return;
        }

        self.adds.fetch_add(1, Ordering::Relaxed);

        if state.processing.contains(&key) {
            debug!(queue = %self.name, key = ?key, "Key in flight, redelivery scheduled");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.item_ready.notify_one();
    }
}

struct Waiting<K> {
    key: K,
    ready_at: Instant,
    seq: u64,
}

impl<K> PartialEq for Waiting<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Waiting<K> {}

impl<K> PartialOrd for Waiting<K> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Waiting<K> {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Rate-limited, deduplicating work queue.
///
/// Must be created inside a Tokio runtime: it spawns the timer loop that
/// feeds delayed keys back into the queue.
pub struct WorkQueue<K: QueueKey> {
    shared: Arc<Shared<K>>,
    rate_limiter: Box<dyn RateLimiter<K>>,
    waiting_tx: mpsc::UnboundedSender<(K, Instant)>,
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create a queue from configuration.
    #[must_use]
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_rate_limiter(config.name.clone(), config.rate_limiter())
    }

    /// Create a queue with a custom rate limiter.
    #[must_use]
    pub fn with_rate_limiter(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter<K>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            item_ready: Notify::new(),
            idle: Notify::new(),
            shutdown_tx,
            adds: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        });

        tokio::spawn(waiting_loop(shared.clone(), waiting_rx, shutdown_rx));

        Self {
            shared,
            rate_limiter,
            waiting_tx,
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Mark a key as needing processing.
    ///
    /// No-op if the key is already pending or the queue is shutting down. If
    /// the key is in flight it is redelivered once after `done`.
    pub fn add(&self, key: K) {
        self.shared.add(key);
    }

    /// Take the next key, waiting until one is available.
    ///
    /// Returns `None` once the queue has been shut down and every pending key
    /// has been handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = pin!(self.shared.item_ready.notified());
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.item_ready.notify_one();
                    }
                    return Some(key);
                }

                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a key's processing as finished.
    ///
    /// A key re-added while in flight goes straight back into the queue.
    pub fn done(&self, key: &K) {
        let mut state = self.shared.lock();
        state.processing.remove(key);

        let requeued = state.dirty.contains(key);
        if requeued {
            state.queue.push_back(key.clone());
        }
        let idle = state.processing.is_empty();
        drop(state);

        if requeued {
            debug!(queue = %self.shared.name, key = ?key, "Redelivering key re-added while in flight");
            self.shared.item_ready.notify_one();
        }
        if idle {
            self.shared.idle.notify_waiters();
        }
    }

    /// Clear the key's failure history.
    pub fn forget(&self, key: &K) {
        self.rate_limiter.forget(key);
    }

    /// Number of rate-limited requeues since the last `forget`.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Requeue the key after its backoff delay.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.rate_limiter.when(&key);
        self.shared.retries.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.shared.name, key = ?key, delay_ms = delay.as_millis(), "Requeue with backoff");
        self.add_after(key, delay);
    }

    /// Add the key once `delay` has elapsed.
    ///
    /// If the key is already waiting, the earlier deadline wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }

        if delay.is_zero() {
            self.add(key);
            return;
        }

        // A closed channel means the timer loop exited on shutdown.
        let _ = self.waiting_tx.send((key, Instant::now() + delay));
    }

    /// Stop accepting keys. Consumers drain what is pending, then `get` returns `None`.
    pub fn shut_down(&self) {
        let mut state = self.shared.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        let pending = state.queue.len();
        drop(state);

        debug!(queue = %self.shared.name, pending, "Queue shutting down");
        self.shared.shutdown_tx.send_replace(true);
        self.shared.item_ready.notify_waiters();
    }

    /// Shut down, then wait until no key is in flight.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();

        loop {
            let mut notified = pin!(self.shared.idle.notified());
            notified.as_mut().enable();

            if self.shared.lock().processing.is_empty() {
                return;
            }

            notified.await;
        }
    }

    /// Whether `shut_down` has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Whether no key is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the ready keys in delivery order.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<K> {
        self.shared.lock().queue.iter().cloned().collect()
    }

    /// Whether the key is currently held by a consumer.
    #[must_use]
    pub fn is_processing(&self, key: &K) -> bool {
        self.shared.lock().processing.contains(key)
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.shared.lock();
        QueueMetrics {
            depth: state.queue.len(),
            in_flight: state.processing.len(),
            waiting: self.shared.waiting.load(Ordering::Relaxed),
            adds: self.shared.adds.load(Ordering::Relaxed),
            retries: self.shared.retries.load(Ordering::Relaxed),
        }
    }
}

/// Moves delayed keys into the queue when their deadline passes.
async fn waiting_loop<K: QueueKey>(
    shared: Arc<Shared<K>>,
    mut waiting_rx: mpsc::UnboundedReceiver<(K, Instant)>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut heap: BinaryHeap<Waiting<K>> = BinaryHeap::new();
    let mut deadlines: HashMap<K, Instant> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|entry| entry.ready_at <= now) {
            let Some(entry) = heap.pop() else {
                break;
            };
            // Superseded entries no longer match the recorded deadline.
            if deadlines.get(&entry.key) == Some(&entry.ready_at) {
                deadlines.remove(&entry.key);
                shared.add(entry.key);
            }
        }
        shared.waiting.store(deadlines.len(), Ordering::Relaxed);

        let next = heap.peek().map(|entry| entry.ready_at);

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    shared.waiting.store(0, Ordering::Relaxed);
                    return;
                }
            }
            received = waiting_rx.recv() => {
                let Some((key, ready_at)) = received else {
                    return;
                };
                let earlier_exists = deadlines
                    .get(&key)
                    .is_some_and(|existing| *existing <= ready_at);
                if !earlier_exists {
                    deadlines.insert(key.clone(), ready_at);
                    seq = seq.wrapping_add(1);
                    heap.push(Waiting { key, ready_at, seq });
                }
            }
            () = sleep_until(next.unwrap_or(now)), if next.is_some() => {}
        }
    }
}
