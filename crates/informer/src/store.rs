//! Local indexed cache of observed objects.
//!
//! Single writer (the informer), many readers. Readers never observe a
//! partially applied event: each change replaces one `Arc` under the lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use eddy_core::{DynamicObject, Error, ResourceKey, Result};
use itertools::Itertools;
use tokio::sync::watch;
use tracing::info;

use crate::stop::stopped;

/// Read access to cached objects, as seen by workers.
pub trait ObjectCache: Send + Sync {
    /// Current state at `key`; `None` means the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheLookup` if the cache cannot be read.
    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Arc<DynamicObject>>>;

    /// Whether the initial listing has been fully applied.
    fn has_synced(&self) -> bool;
}

/// Key to object store with a synced flag.
pub struct Store {
    objects: RwLock<HashMap<ResourceKey, Arc<DynamicObject>>>,
    synced: watch::Sender<bool>,
}

impl Store {
    /// Create an empty, unsynced store.
    #[must_use]
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            objects: RwLock::new(HashMap::new()),
            synced,
        }
    }

    /// All cached objects.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.read().values().cloned().collect_vec()
    }

    /// All cached keys, sorted.
    #[must_use]
    pub fn list_keys(&self) -> Vec<ResourceKey> {
        self.read().keys().cloned().sorted().collect_vec()
    }

    /// Objects in one namespace; `None` selects cluster-scoped objects.
    #[must_use]
    pub fn by_namespace(&self, namespace: Option<&str>) -> Vec<Arc<DynamicObject>> {
        self.read()
            .values()
            .filter(|obj| obj.namespace() == namespace)
            .cloned()
            .collect_vec()
    }

    /// Number of cached objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Subscribe to the synced flag.
    #[must_use]
    pub fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Wait until the initial listing is applied or the stop signal fires.
    ///
    /// Returns `true` only if the store synced. A stop that is already
    /// signalled wins over a completed sync.
    pub async fn wait_for_sync(&self, stop: &mut watch::Receiver<bool>) -> bool {
        let mut synced = self.synced.subscribe();
        let synced = async move { synced.wait_for(|synced| *synced).await.is_ok() };

        tokio::select! {
            biased;
            () = stopped(stop) => false,
            synced = synced => synced,
        }
    }

    /// Flip the synced flag. Returns `true` only the first time.
    pub(crate) fn mark_synced(&self) -> bool {
        let flipped = self.synced.send_if_modified(|synced| {
            if *synced {
                false
            } else {
                *synced = true;
                true
            }
        });
        if flipped {
            info!(objects = self.len(), "CACHE: Initial listing applied, cache synced");
        }
        flipped
    }

    pub(crate) fn get(&self, key: &ResourceKey) -> Option<Arc<DynamicObject>> {
        self.read().get(key).cloned()
    }

    pub(crate) fn upsert(&self, key: ResourceKey, obj: Arc<DynamicObject>) {
        self.write().insert(key, obj);
    }

    pub(crate) fn remove(&self, key: &ResourceKey) -> Option<Arc<DynamicObject>> {
        self.write().remove(key)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, Arc<DynamicObject>>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, Arc<DynamicObject>>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCache for Store {
    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Arc<DynamicObject>>> {
        self.objects
            .read()
            .map(|objects| objects.get(key).cloned())
            .map_err(|e| Error::cache_lookup(key.as_str(), e.to_string()))
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }
}
