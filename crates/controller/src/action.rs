//! The reconcile action hook.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use eddy_core::{DynamicObject, ResourceKey};
use thiserror::Error;

/// Everything a reconcile action is told about one dequeued key.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    /// Canonical key.
    pub key: ResourceKey,
    /// Namespace, `None` for cluster-scoped resources.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
    /// Kind of the cached object, when it exists and carries one.
    pub kind: Option<String>,
    /// `false` means the resource was deleted.
    pub exists: bool,
    /// Cached state at lookup time.
    pub object: Option<Arc<DynamicObject>>,
}

/// Failure reported by a reconcile action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// Try again after backoff.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Retrying cannot help; the key is dropped.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ReconcileError {
    /// Create a retryable error.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    /// Create a permanent error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }
}

/// The per-resource business logic.
///
/// Called once per dequeue, possibly concurrently for different keys but
/// never concurrently for the same key. Must be idempotent and must enforce
/// its own timeouts: a hung call blocks its worker.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Converge one resource.
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<(), ReconcileError>;
}

/// [`Reconcile`] implementation wrapping a closure.
pub struct FnReconciler<F> {
    f: F,
}

/// Build a [`Reconcile`] from an async closure.
pub fn reconcile_fn<F, Fut>(f: F) -> FnReconciler<F>
where
    F: Fn(ReconcileRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReconcileError>> + Send,
{
    FnReconciler { f }
}

#[async_trait]
impl<F, Fut> Reconcile for FnReconciler<F>
where
    F: Fn(ReconcileRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReconcileError>> + Send,
{
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<(), ReconcileError> {
        (self.f)(request.clone()).await
    }
}
