//! Lifecycle controller.
//!
//! Sequences startup (watch, sync barrier, workers) and shutdown (queue
//! drain, worker exit). State moves strictly forward:
//!
//! ```text
//! Created -> CacheWarming -> Running -> Draining -> Stopped
//!                  \___________________________________^  (stop before sync)
//! ```

use std::fmt;
use std::sync::Arc;

use eddy_core::ResourceKey;
use eddy_informer::{Informer, ResourceEventHandler, ResourceSource, Store, stopped};
use eddy_queue::{QueueMetrics, WorkQueue};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::action::Reconcile;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::stats::{ControllerStats, Counters};
use crate::translator::EventTranslator;
use crate::worker::{Worker, WorkerContext};

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Constructed, not started.
    Created,
    /// Watching; waiting for the initial listing.
    CacheWarming,
    /// Workers are processing keys.
    Running,
    /// Stop requested; workers finish pending keys.
    Draining,
    /// Everything has exited.
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::CacheWarming => "cache_warming",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Handle to stop a controller. Cloneable; stopping twice is harmless.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Request shutdown.
    pub fn stop(&self) {
        let _ = self.stop_tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Receiver that reads `true` once a stop is requested, for tasks
    /// that should end with the controller.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunSummary {
    /// Workers launched.
    pub workers: usize,
    /// Outcome counters.
    pub stats: ControllerStats,
    /// Queue counters at exit.
    pub queue: QueueMetrics,
}

/// Owns the informer, queue, and worker pool for one resource collection.
pub struct Controller {
    informer: Informer,
    queue: Arc<WorkQueue<ResourceKey>>,
    action: Arc<dyn Reconcile>,
    config: ControllerConfig,
    counters: Arc<Counters>,
    state_tx: watch::Sender<ControllerState>,
    stop_tx: watch::Sender<bool>,
}

impl Controller {
    /// Wire a controller together. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` or `Error::Core` if the configuration
    /// does not validate.
    pub fn new(
        source: Arc<dyn ResourceSource>,
        action: Arc<dyn Reconcile>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(WorkQueue::new(&config.queue));
        let counters = Arc::new(Counters::default());

        let mut informer = Informer::new(source, config.informer.clone());
        informer.add_event_handler(Arc::new(EventTranslator::new(
            queue.clone(),
            counters.clone(),
        )));

        let (state_tx, _) = watch::channel(ControllerState::Created);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            informer,
            queue,
            action,
            config,
            counters,
            state_tx,
            stop_tx,
        })
    }

    /// Register an extra handler for cache notifications.
    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler>) {
        self.informer.add_event_handler(handler);
    }

    /// Handle that triggers shutdown.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    /// Follow lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// The local cache workers read from.
    #[must_use]
    pub fn store(&self) -> Arc<Store> {
        self.informer.store()
    }

    /// The work queue.
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue<ResourceKey>> {
        self.queue.clone()
    }

    /// Current outcome counters.
    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        self.counters.snapshot()
    }

    /// Run until stopped.
    ///
    /// Starts the informer, waits for the cache to sync, then runs `workers`
    /// workers. After a stop the queue is drained and every worker exits
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `workers` is zero, and
    /// `Error::CacheSyncAborted` if the stop signal fires before the cache
    /// syncs. No worker is started in either case.
    pub async fn run(self, workers: usize) -> Result<RunSummary> {
        if workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }

        let Self {
            informer,
            queue,
            action,
            config,
            counters,
            state_tx,
            stop_tx,
        } = self;

        let store = informer.store();
        let mut stop = stop_tx.subscribe();

        transition(&state_tx, ControllerState::CacheWarming);
        info!(queue = %queue.name(), workers, "CONTROLLER: Starting, waiting for cache sync");
        let informer_task = tokio::spawn(informer.run(stop_tx.subscribe()));

        if !store.wait_for_sync(&mut stop).await {
            warn!("CONTROLLER: Stopped before cache sync, no workers started");
            queue.shut_down();
            join_informer(informer_task).await;
            transition(&state_tx, ControllerState::Stopped);
            return Err(Error::CacheSyncAborted);
        }

        transition(&state_tx, ControllerState::Running);
        info!(objects = store.len(), workers, status = "running", "CONTROLLER: Started successfully");

        let cache: Arc<dyn eddy_informer::ObjectCache> = store;
        let mut pool = JoinSet::new();
        for id in 1..=workers {
            let worker = Worker {
                queue: queue.clone(),
                cache: cache.clone(),
                action: action.clone(),
                counters: counters.clone(),
                max_retries: config.max_retries,
            };
            counters.worker_started();
            pool.spawn(worker.run(WorkerContext { id }));
        }

        stopped(&mut stop).await;

        transition(&state_tx, ControllerState::Draining);
        info!(pending = queue.len(), "CONTROLLER: Stop requested, draining queue");
        queue.shut_down();

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "CONTROLLER: Worker task failed");
            }
        }
        join_informer(informer_task).await;

        let summary = RunSummary {
            workers,
            stats: counters.snapshot(),
            queue: queue.metrics(),
        };
        transition(&state_tx, ControllerState::Stopped);
        info!(
            processed = summary.stats.processed,
            succeeded = summary.stats.succeeded,
            failed = summary.stats.failed,
            dead_lettered = summary.stats.dead_lettered,
            dropped = summary.stats.dropped,
            "CONTROLLER: Stopped"
        );

        Ok(summary)
    }
}

fn transition(state_tx: &watch::Sender<ControllerState>, next: ControllerState) {
    let previous = state_tx.send_replace(next);
    info!(from = %previous, to = %next, "CONTROLLER: State transition");
}

async fn join_informer(task: tokio::task::JoinHandle<()>) {
    if let Err(e) = task.await {
        error!(error = %e, "CONTROLLER: Informer task failed");
    }
}
