//! End-to-end controller scenarios against an in-memory source.
//!
//! Each test wires a real informer, queue, and worker pool, drives the source,
//! and checks what the reconcile action observed.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eddy_controller::{
    Controller, ControllerConfig, ControllerState, Error, ReconcileError, ReconcileRequest,
    RunSummary, StopHandle, reconcile_fn,
};
use eddy_core::{DynamicObject, ResourceKey};
use eddy_informer::{InformerConfig, MemorySource, ObjectCache, Store};
use eddy_queue::{QueueConfig, WorkQueue};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Call {
    key: String,
    exists: bool,
    synced: bool,
    at: Instant,
}

#[derive(Default)]
struct Calls {
    calls: Mutex<Vec<Call>>,
}

impl Calls {
    fn record(&self, request: &ReconcileRequest, synced: bool) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call {
            key: request.key.to_string(),
            exists: request.exists,
            synced,
            at: Instant::now(),
        });
        calls.len()
    }

    fn snapshot(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct Running {
    task: JoinHandle<eddy_controller::Result<RunSummary>>,
    stop: StopHandle,
    queue: Arc<WorkQueue<ResourceKey>>,
    state: watch::Receiver<ControllerState>,
}

impl Running {
    async fn finish(self) -> eddy_controller::Result<RunSummary> {
        self.stop.stop();
        tokio::time::timeout(Duration::from_secs(30), self.task)
            .await
            .unwrap()
            .unwrap()
    }
}

fn start(controller: Controller, workers: usize) -> Running {
    let stop = controller.stop_handle();
    let queue = controller.queue();
    let state = controller.subscribe_state();
    let task = tokio::spawn(controller.run(workers));
    Running {
        task,
        stop,
        queue,
        state,
    }
}

fn config() -> ControllerConfig {
    ControllerConfig::default()
        .with_queue(
            QueueConfig::named("test").with_backoff(Duration::from_millis(10), Duration::from_secs(10)),
        )
        .with_informer(
            InformerConfig {
                reconnect_base_ms: 1,
                reconnect_max_ms: 10,
                ..InformerConfig::default()
            }
            .without_jitter(),
        )
}

fn sample(name: &str) -> DynamicObject {
    DynamicObject::new(name)
        .with_namespace("default")
        .with_kind("Sample")
}

fn store_slot() -> Arc<Mutex<Option<Arc<Store>>>> {
    Arc::new(Mutex::new(None))
}

fn synced(slot: &Mutex<Option<Arc<Store>>>) -> bool {
    slot.lock()
        .unwrap()
        .as_ref()
        .is_some_and(|store| store.has_synced())
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never reached: {what}");
}

// ==========================================================================
// SCENARIO: Added object is reconciled once and forgotten
// ==========================================================================

#[tokio::test]
async fn given_added_object_when_action_succeeds_then_key_is_forgotten_and_queue_empty() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();

    let calls = Arc::new(Calls::default());
    let slot = store_slot();
    let (recorded, seen_store) = (calls.clone(), slot.clone());
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, synced(&seen_store));
        async { Ok(()) }
    });

    let controller = Controller::new(source, Arc::new(action), config()).unwrap();
    *slot.lock().unwrap() = Some(controller.store());
    let running = start(controller, 2);

    eventually("sample-1 reconciled", || calls.len() == 1).await;
    let key = ResourceKey::from("default/sample-1");
    eventually("key done", || !running.queue.is_processing(&key)).await;

    assert!(running.queue.is_empty());
    assert_eq!(running.queue.num_requeues(&key), 0);
    assert_eq!(*running.state.borrow(), ControllerState::Running);

    let call = &calls.snapshot()[0];
    assert_eq!(call.key, "default/sample-1");
    assert!(call.exists);
    assert!(call.synced, "worker ran before the cache synced");

    let state = running.state.clone();
    let summary = running.finish().await.unwrap();
    assert_eq!(summary.workers, 2);
    assert_eq!(summary.stats.workers_started, 2);
    assert_eq!(summary.stats.processed, 1);
    assert_eq!(summary.stats.succeeded, 1);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(*state.borrow(), ControllerState::Stopped);
}

// ==========================================================================
// SCENARIO: Update while in flight is redelivered exactly once
// ==========================================================================

#[tokio::test]
async fn given_update_during_reconcile_then_key_is_redelivered_once_after_done() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();

    let calls = Arc::new(Calls::default());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (recorded, entered_tx, release_rx) = (calls.clone(), entered.clone(), release.clone());
    let action = reconcile_fn(move |req: ReconcileRequest| {
        let call = recorded.record(&req, true);
        let (entered_tx, release_rx) = (entered_tx.clone(), release_rx.clone());
        async move {
            if call == 1 {
                entered_tx.notify_one();
                release_rx.notified().await;
            }
            Ok(())
        }
    });

    let controller = Controller::new(source.clone(), Arc::new(action), config()).unwrap();
    let store = controller.store();
    let running = start(controller, 2);

    entered.notified().await;
    source.apply(sample("sample-1").with_field("spec", serde_json::json!({"replicas": 2})))
        .unwrap();

    let key = ResourceKey::from("default/sample-1");
    eventually("update cached", || {
        store
            .get_by_key(&key)
            .ok()
            .flatten()
            .and_then(|obj| obj.resource_version())
            == Some(2)
    })
    .await;

    // The update is parked behind the in-flight item, not handed to the idle worker.
    assert!(running.queue.is_processing(&key));
    assert_eq!(running.queue.len(), 0);
    assert_eq!(calls.len(), 1);

    release.notify_one();
    eventually("redelivered", || calls.len() == 2).await;
    eventually("settled", || !running.queue.is_processing(&key)).await;
    assert!(running.queue.is_empty());

    let summary = running.finish().await.unwrap();
    assert_eq!(summary.stats.processed, 2);
    assert_eq!(calls.len(), 2);
}

// ==========================================================================
// SCENARIO: Backoff grows across failures and restarts after success
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn given_three_failures_then_delays_increase_and_success_resets_backoff() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();

    let calls = Arc::new(Calls::default());
    let recorded = calls.clone();
    let action = reconcile_fn(move |req: ReconcileRequest| {
        let call = recorded.record(&req, true);
        async move {
            match call {
                1..=3 | 5 => Err(ReconcileError::retryable(format!("attempt {call} failed"))),
                _ => Ok(()),
            }
        }
    });

    let controller = Controller::new(source.clone(), Arc::new(action), config()).unwrap();
    let running = start(controller, 1);
    let key = ResourceKey::from("default/sample-1");

    eventually("first success", || calls.len() == 4).await;
    eventually("forgotten", || {
        !running.queue.is_processing(&key) && running.queue.num_requeues(&key) == 0
    })
    .await;

    source.apply(sample("sample-1").with_field("spec", serde_json::json!({"replicas": 3})))
        .unwrap();
    eventually("failure after success retried", || calls.len() == 6).await;

    let at: Vec<Instant> = calls.snapshot().iter().map(|call| call.at).collect();
    let gaps: Vec<Duration> = at.windows(2).map(|pair| pair[1] - pair[0]).collect();

    assert!(gaps[0] < gaps[1], "{gaps:?}");
    assert!(gaps[1] < gaps[2], "{gaps:?}");
    assert!(gaps[0] >= Duration::from_millis(10), "{gaps:?}");
    // Call 5 failed after the reset; its retry waits the base delay again.
    assert!(gaps[4] < gaps[1], "{gaps:?}");
    assert!(gaps[4] >= Duration::from_millis(10), "{gaps:?}");

    let summary = running.finish().await.unwrap();
    assert_eq!(summary.stats.failed, 4);
    assert_eq!(summary.stats.succeeded, 2);
}

// ==========================================================================
// SCENARIO: Stop during cache warming aborts startup
// ==========================================================================

#[tokio::test]
async fn given_stop_during_cache_warming_then_stopped_without_workers() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();
    source.fail_next_lists(u32::MAX);

    let calls = Arc::new(Calls::default());
    let recorded = calls.clone();
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, false);
        async { Ok(()) }
    });

    let controller = Controller::new(source.clone(), Arc::new(action), config()).unwrap();
    let store = controller.store();
    let running = start(controller, 3);

    eventually("listing attempted", || source.list_calls() >= 1).await;
    assert_eq!(*running.state.borrow(), ControllerState::CacheWarming);

    let queue = running.queue.clone();
    let state = running.state.clone();
    let result = running.finish().await;

    assert!(matches!(result, Err(Error::CacheSyncAborted)));
    assert_eq!(*state.borrow(), ControllerState::Stopped);
    assert_eq!(calls.len(), 0);
    assert!(!store.has_synced());
    assert!(queue.is_shutting_down());
    assert_eq!(queue.metrics().adds, 0);
}

// ==========================================================================
// SCENARIO: Missed delete is recovered through a tombstone
// ==========================================================================

#[tokio::test]
async fn given_delete_missed_during_disconnect_then_tombstone_reconciles_key_once() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();
    source.apply(sample("sample-2")).unwrap();

    let calls = Arc::new(Calls::default());
    let recorded = calls.clone();
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, true);
        async { Ok(()) }
    });

    let controller = Controller::new(source.clone(), Arc::new(action), config()).unwrap();
    let running = start(controller, 2);

    eventually("initial reconciles", || calls.len() == 2).await;
    eventually("watch opened", || source.watch_calls() >= 1).await;

    source.disconnect_watchers();
    source.delete(&ResourceKey::from("default/sample-2"));
    source.compact();

    eventually("tombstone reconciled", || calls.len() == 3).await;
    let last = calls.snapshot().pop().unwrap();
    assert_eq!(last.key, "default/sample-2");
    assert!(!last.exists);

    let summary = running.finish().await.unwrap();
    assert_eq!(summary.stats.processed, 3);
    assert_eq!(summary.stats.dropped, 0);
}

// ==========================================================================
// SCENARIO: Retry cap dead-letters a key that never succeeds
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn given_max_retries_when_action_keeps_failing_then_key_is_dead_lettered() {
    let source = Arc::new(MemorySource::new());
    source.apply(sample("sample-1")).unwrap();

    let calls = Arc::new(Calls::default());
    let recorded = calls.clone();
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, true);
        async { Err(ReconcileError::retryable("backend unavailable")) }
    });

    let controller =
        Controller::new(source, Arc::new(action), config().with_max_retries(2)).unwrap();
    let running = start(controller, 1);

    eventually("attempts exhausted", || calls.len() == 3).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.len(), 3);

    let key = ResourceKey::from("default/sample-1");
    assert_eq!(running.queue.num_requeues(&key), 0);

    let summary = running.finish().await.unwrap();
    assert_eq!(summary.stats.failed, 3);
    assert_eq!(summary.stats.dead_lettered, 1);
}

// ==========================================================================
// SCENARIO: Keys are never reconciled concurrently; stop drains the queue
// ==========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_many_workers_then_no_key_is_processed_concurrently() {
    let source = Arc::new(MemorySource::new());
    for id in 0..20 {
        source.apply(sample(&format!("sample-{id}"))).unwrap();
    }

    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let overlaps = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(Calls::default());
    let (active, overlapped, recorded) = (in_flight.clone(), overlaps.clone(), calls.clone());
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, true);
        let (active, overlapped) = (active.clone(), overlapped.clone());
        async move {
            let key = req.key.to_string();
            if !active.lock().unwrap().insert(key.clone()) {
                overlapped.lock().unwrap().push(key.clone());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            active.lock().unwrap().remove(&key);
            Ok(())
        }
    });

    let controller = Controller::new(source.clone(), Arc::new(action), config()).unwrap();
    let running = start(controller, 4);

    eventually("initial pass", || calls.len() >= 20).await;
    for round in 0..3 {
        for id in 0..20 {
            source
                .apply(
                    sample(&format!("sample-{id}"))
                        .with_field("spec", serde_json::json!({ "round": round })),
                )
                .unwrap();
        }
    }

    let summary = running.finish().await.unwrap();
    assert!(overlaps.lock().unwrap().is_empty(), "{:?}", overlaps.lock().unwrap());
    assert_eq!(summary.stats.processed, summary.stats.succeeded);
    assert_eq!(summary.queue.in_flight, 0);
    assert_eq!(summary.queue.depth, 0);
}

#[tokio::test(start_paused = true)]
async fn given_pending_keys_when_stopped_then_workers_drain_before_exit() {
    let source = Arc::new(MemorySource::new());
    for id in 0..10 {
        source.apply(sample(&format!("sample-{id}"))).unwrap();
    }

    let calls = Arc::new(Calls::default());
    let recorded = calls.clone();
    let action = reconcile_fn(move |req: ReconcileRequest| {
        recorded.record(&req, true);
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    });

    let controller = Controller::new(source, Arc::new(action), config()).unwrap();
    let running = start(controller, 1);

    eventually("first key taken", || calls.len() >= 1).await;
    let summary = running.finish().await.unwrap();

    assert_eq!(calls.len(), 10);
    assert_eq!(summary.stats.processed, 10);
    assert_eq!(summary.stats.succeeded, 10);
}
