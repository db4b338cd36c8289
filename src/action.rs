//! Default reconcile action: log the resource and simulate work.

use std::time::Duration;

use async_trait::async_trait;
use eddy_controller::{Reconcile, ReconcileError, ReconcileRequest};
use tracing::info;

/// Logs each reconciled resource, then sleeps for the configured work time.
#[derive(Debug, Clone, Copy)]
pub struct LoggingReconciler {
    work: Duration,
}

impl LoggingReconciler {
    #[must_use]
    pub const fn new(work: Duration) -> Self {
        Self { work }
    }
}

#[async_trait]
impl Reconcile for LoggingReconciler {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<(), ReconcileError> {
        let namespace = request.namespace.as_deref().unwrap_or_default();

        if request.exists {
            info!(
                resource = %request.key,
                namespace,
                name = %request.name,
                kind = request.kind.as_deref().unwrap_or_default(),
                "WORKER: Processing resource"
            );
        } else {
            info!(
                resource = %request.key,
                namespace,
                name = %request.name,
                "WORKER: Processing deleted resource"
            );
        }

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use eddy_core::{DynamicObject, ResourceKey};
    use tokio::time::Instant;

    use super::*;

    fn request(exists: bool) -> ReconcileRequest {
        let object = exists.then(|| {
            Arc::new(
                DynamicObject::new("sample-1")
                    .with_namespace("default")
                    .with_kind("Sample"),
            )
        });
        ReconcileRequest {
            key: ResourceKey::from("default/sample-1"),
            namespace: Some("default".to_string()),
            name: "sample-1".to_string(),
            kind: object.as_ref().and_then(|o| o.kind().map(str::to_string)),
            exists,
            object,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulates_configured_work() {
        let reconciler = LoggingReconciler::new(Duration::from_millis(100));
        let started = Instant::now();

        assert!(reconciler.reconcile(&request(true)).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_deleted_resource_succeeds() {
        let reconciler = LoggingReconciler::new(Duration::ZERO);
        assert!(reconciler.reconcile(&request(false)).await.is_ok());
    }
}
