//! Worker loop: dequeue, resolve, reconcile, report.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use eddy_core::ResourceKey;
use eddy_informer::ObjectCache;
use eddy_queue::WorkQueue;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::action::{Reconcile, ReconcileError, ReconcileRequest};
use crate::stats::Counters;

/// Identity of one worker, for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// 1-based ordinal.
    pub id: usize,
}

pub(crate) struct Worker {
    pub(crate) queue: Arc<WorkQueue<ResourceKey>>,
    pub(crate) cache: Arc<dyn ObjectCache>,
    pub(crate) action: Arc<dyn Reconcile>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) max_retries: Option<u32>,
}

impl Worker {
    /// Process keys until the queue is shut down and drained.
    pub(crate) async fn run(self, ctx: WorkerContext) {
        info!(worker = ctx.id, "WORKER: Started");

        while let Some(key) = self.queue.get().await {
            self.counters.processed();
            info!(worker = ctx.id, resource = %key, "QUEUE: Item dequeued");
            self.process(ctx, &key).await;
        }

        info!(worker = ctx.id, "WORKER: Shutting down");
    }

    async fn process(&self, ctx: WorkerContext, key: &ResourceKey) {
        let request = match self.resolve(key) {
            Ok(request) => request,
            Err(Resolve::Malformed(reason)) => {
                error!(worker = ctx.id, resource = %key, error = %reason, "WORKER: Invalid resource key");
                self.drop_key(key);
                return;
            }
            Err(Resolve::Lookup(reason)) => {
                warn!(worker = ctx.id, resource = %key, error = %reason, "WORKER: Error retrieving object from cache");
                self.retry(ctx, key);
                return;
            }
        };

        debug!(
            worker = ctx.id,
            resource = %key,
            exists = request.exists,
            "WORKER: Reconciling"
        );

        let outcome = AssertUnwindSafe(self.action.reconcile(&request))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.queue.forget(key);
                self.queue.done(key);
                self.counters.succeeded();
                info!(worker = ctx.id, resource = %key, "QUEUE: Item processed successfully");
            }
            Ok(Err(ReconcileError::Permanent(reason))) => {
                error!(worker = ctx.id, resource = %key, error = %reason, "WORKER: Permanent failure, dropping");
                self.drop_key(key);
            }
            Ok(Err(ReconcileError::Retryable(reason))) => {
                warn!(worker = ctx.id, resource = %key, error = %reason, "WORKER: Error processing item");
                self.retry(ctx, key);
            }
            Err(_) => {
                error!(worker = ctx.id, resource = %key, "WORKER: Reconcile panicked");
                self.retry(ctx, key);
            }
        }
    }

    fn resolve(&self, key: &ResourceKey) -> Result<ReconcileRequest, Resolve> {
        let (namespace, name) = key
            .split()
            .map_err(|e| Resolve::Malformed(e.to_string()))?;
        let object = self
            .cache
            .get_by_key(key)
            .map_err(|e| Resolve::Lookup(e.to_string()))?;

        Ok(ReconcileRequest {
            key: key.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            kind: object.as_ref().and_then(|obj| obj.kind().map(str::to_string)),
            exists: object.is_some(),
            object,
        })
    }

    fn retry(&self, ctx: WorkerContext, key: &ResourceKey) {
        self.counters.failed();

        let attempts = self.queue.num_requeues(key);
        if self.max_retries.is_some_and(|max| attempts >= max) {
            error!(
                worker = ctx.id,
                resource = %key,
                attempts,
                "WORKER: Retries exhausted, dead-lettering"
            );
            self.queue.forget(key);
            self.queue.done(key);
            self.counters.dead_lettered();
            return;
        }

        self.queue.done(key);
        self.queue.add_rate_limited(key.clone());
    }

    fn drop_key(&self, key: &ResourceKey) {
        self.queue.forget(key);
        self.queue.done(key);
        self.counters.dropped();
    }
}

enum Resolve {
    Malformed(String),
    Lookup(String),
}
