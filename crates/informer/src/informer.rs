//! List/watch reflector.
//!
//! The informer is the only writer of its [`Store`]. It lists the source,
//! diffs the snapshot into the store, then follows the watch stream. When the
//! stream drops it reconnects with backoff, resuming from the last version it
//! saw; when resuming is impossible it relists. Handlers are notified after
//! the store has been written.
//!
//! A `Deleted` event for a key the store does not hold never reaches the
//! handlers: there is no cached state to hand them, and a relist already
//! reports every object that vanished while unobserved as a tombstone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use eddy_core::{DeletedObject, DynamicObject, Error, ResourceKey, Tombstone, WatchEvent};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::InformerConfig;
use crate::handler::ResourceEventHandler;
use crate::source::{ObjectList, ResourceSource, WatchStream};
use crate::stop::{pause, stopped};
use crate::store::Store;

/// How a single watch connection ended.
enum WatchEnd {
    Stopped,
    Expired,
    Disconnected {
        progressed: bool,
        error: Option<Error>,
    },
}

/// Keeps a [`Store`] in step with a [`ResourceSource`].
pub struct Informer {
    source: Arc<dyn ResourceSource>,
    config: InformerConfig,
    store: Arc<Store>,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
}

impl Informer {
    /// Create an informer with an empty, unsynced store.
    #[must_use]
    pub fn new(source: Arc<dyn ResourceSource>, config: InformerConfig) -> Self {
        Self {
            source,
            config,
            store: Arc::new(Store::new()),
            handlers: Vec::new(),
        }
    }

    /// Shared read handle to the cache.
    #[must_use]
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Register a handler. Only handlers added before [`Informer::run`] are notified.
    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler>) {
        self.handlers.push(handler);
    }

    /// Whether the initial listing has been applied.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.store.subscribe_synced().borrow()
    }

    /// Run list/watch until the stop signal fires.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            handlers = self.handlers.len(),
            selector = ?self.config.label_selector,
            "CACHE: Starting list/watch"
        );

        let options = self.config.list_options();
        let mut list_failures: u32 = 0;
        loop {
            let listed = tokio::select! {
                biased;
                () = stopped(&mut stop) => break,
                listed = self.source.list(&options) => listed,
            };

            let list = match listed {
                Ok(list) => {
                    list_failures = 0;
                    list
                }
                Err(e) => {
                    list_failures = list_failures.saturating_add(1);
                    let delay = self.config.reconnect_delay(list_failures);
                    warn!(
                        error = %e,
                        attempt = list_failures,
                        delay_ms = delay_ms(delay),
                        "CACHE: List failed, retrying"
                    );
                    if pause(delay, &mut stop).await {
                        continue;
                    }
                    break;
                }
            };

            let version = self.replace(list);
            self.store.mark_synced();

            if !self.follow(version, &mut stop).await {
                break;
            }
        }

        info!("CACHE: List/watch stopped");
    }

    /// Watch from `version`, reconnecting as needed.
    ///
    /// Returns `true` when a relist is required and `false` on stop.
    async fn follow(&self, mut version: u64, stop: &mut watch::Receiver<bool>) -> bool {
        let mut failures: u32 = 0;

        loop {
            let options = self.config.watch_options(version);
            let opened = tokio::select! {
                biased;
                () = stopped(stop) => return false,
                opened = self.source.watch(&options) => opened,
            };

            let end = match opened {
                Ok(stream) => self.consume(stream, &mut version, stop).await,
                Err(Error::WatchExpired { .. }) => WatchEnd::Expired,
                Err(e) => WatchEnd::Disconnected {
                    progressed: false,
                    error: Some(e),
                },
            };

            match end {
                WatchEnd::Stopped => return false,
                WatchEnd::Expired => {
                    info!(version, "CACHE: Watch version expired, relisting");
                    return true;
                }
                WatchEnd::Disconnected { progressed, error } => {
                    if progressed {
                        failures = 0;
                    }
                    failures = failures.saturating_add(1);

                    if failures >= self.config.max_watch_failures {
                        warn!(
                            failures,
                            version, "CACHE: Watch keeps failing, falling back to relist"
                        );
                        return true;
                    }

                    let delay = self.config.reconnect_delay(failures);
                    match error {
                        Some(e) => warn!(
                            error = %e,
                            version,
                            attempt = failures,
                            delay_ms = delay_ms(delay),
                            "CACHE: Watch failed, reconnecting"
                        ),
                        None => debug!(
                            version,
                            attempt = failures,
                            delay_ms = delay_ms(delay),
                            "CACHE: Watch closed, reconnecting"
                        ),
                    }

                    if !pause(delay, stop).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn consume(
        &self,
        mut stream: WatchStream,
        version: &mut u64,
        stop: &mut watch::Receiver<bool>,
    ) -> WatchEnd {
        let mut progressed = false;

        loop {
            let next = tokio::select! {
                biased;
                () = stopped(stop) => return WatchEnd::Stopped,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if let Some(seen) = event.resource_version() {
                        *version = (*version).max(seen);
                    }
                    progressed = true;
                    self.apply_event(event);
                }
                Some(Err(Error::WatchExpired { .. })) => return WatchEnd::Expired,
                Some(Err(e)) => {
                    return WatchEnd::Disconnected {
                        progressed,
                        error: Some(e),
                    };
                }
                None => {
                    return WatchEnd::Disconnected {
                        progressed,
                        error: None,
                    };
                }
            }
        }
    }

    /// Diff a fresh snapshot into the store. Returns the snapshot version.
    fn replace(&self, list: ObjectList) -> u64 {
        let mut listed = BTreeMap::new();
        for obj in list.items {
            match ResourceKey::from_object(&obj) {
                Ok(key) => {
                    listed.insert(key, Arc::new(obj));
                }
                Err(e) => warn!(error = %e, "CACHE: Skipping listed object without identity"),
            }
        }

        // Objects that vanished between listings were deleted while we were
        // not watching: only their last cached state is left.
        for key in self.store.list_keys() {
            if listed.contains_key(&key) {
                continue;
            }
            if let Some(last_known) = self.store.remove(&key) {
                debug!(resource = %key, "CACHE: Object missing from relist");
                let tombstone = DeletedObject::Tombstone(Tombstone::new(key, last_known));
                self.notify_delete(&tombstone);
            }
        }

        for (key, obj) in listed {
            match self.store.get(&key) {
                Some(old) if old.resource_version() == obj.resource_version() => {}
                Some(old) => {
                    self.store.upsert(key, obj.clone());
                    self.notify_update(&old, &obj);
                }
                None => {
                    self.store.upsert(key, obj.clone());
                    self.notify_add(&obj);
                }
            }
        }

        info!(
            version = list.resource_version,
            objects = self.store.len(),
            "CACHE: Listing applied"
        );
        list.resource_version
    }

    fn apply_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Bookmark { resource_version } => {
                debug!(version = resource_version, "CACHE: Bookmark");
            }
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => self.apply_upsert(obj),
            WatchEvent::Deleted(obj) => self.apply_delete(obj),
        }
    }

    fn apply_upsert(&self, obj: DynamicObject) {
        let Some(key) = key_or_warn(&obj) else {
            return;
        };
        let obj = Arc::new(obj);

        match self.store.get(&key) {
            Some(old) if !obj.is_newer_than(&old) => {
                debug!(
                    resource = %key,
                    cached = ?old.resource_version(),
                    received = ?obj.resource_version(),
                    "CACHE: Ignoring stale event"
                );
            }
            Some(old) => {
                self.store.upsert(key, obj.clone());
                self.notify_update(&old, &obj);
            }
            None => {
                self.store.upsert(key, obj.clone());
                self.notify_add(&obj);
            }
        }
    }

    fn apply_delete(&self, obj: DynamicObject) {
        let Some(key) = key_or_warn(&obj) else {
            return;
        };

        let Some(cached) = self.store.get(&key) else {
            debug!(resource = %key, "CACHE: Ignoring delete of unknown object");
            return;
        };

        if matches!(
            (cached.resource_version(), obj.resource_version()),
            (Some(cached), Some(received)) if cached > received
        ) {
            debug!(
                resource = %key,
                cached = ?cached.resource_version(),
                received = ?obj.resource_version(),
                "CACHE: Ignoring stale delete"
            );
            return;
        }

        self.store.remove(&key);
        self.notify_delete(&DeletedObject::Live(Arc::new(obj)));
    }

    fn notify_add(&self, obj: &Arc<DynamicObject>) {
        self.handlers.iter().for_each(|handler| handler.on_add(obj));
    }

    fn notify_update(&self, old: &Arc<DynamicObject>, new: &Arc<DynamicObject>) {
        self.handlers
            .iter()
            .for_each(|handler| handler.on_update(old, new));
    }

    fn notify_delete(&self, deleted: &DeletedObject) {
        self.handlers
            .iter()
            .for_each(|handler| handler.on_delete(deleted));
    }
}

fn key_or_warn(obj: &DynamicObject) -> Option<ResourceKey> {
    match ResourceKey::from_object(obj) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(error = %e, "CACHE: Dropping event without identity");
            None
        }
    }
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
