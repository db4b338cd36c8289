//! In-process resource source.
//!
//! Keeps the authoritative object set in memory, assigns versions, and keeps a
//! bounded history of changes so watchers can resume from a version token.
//! Tests drive it directly; the binary feeds it from manifest files.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use eddy_core::{DynamicObject, Error, ResourceKey, Result, WatchEvent};
use futures::StreamExt;
use futures::channel::mpsc;
use tracing::debug;

use crate::source::{
    ListOptions, ObjectList, ResourceSource, WatchOptions, WatchStream, matches_selector,
};

const DEFAULT_HISTORY_LIMIT: usize = 1024;

struct Watcher {
    sender: mpsc::UnboundedSender<Result<WatchEvent>>,
    selector: BTreeMap<String, String>,
}

impl Watcher {
    /// Deliver a change as this watcher sees it; returns `false` once the
    /// receiving side is gone.
    fn send(&self, change: &Change) -> bool {
        match change.project(&self.selector) {
            Some(event) => self.sender.unbounded_send(Ok(event)).is_ok(),
            None => !self.sender.is_closed(),
        }
    }
}

/// One recorded change, with the state it replaced.
struct Change {
    event: WatchEvent,
    previous: Option<DynamicObject>,
}

impl Change {
    /// The event a watcher with `selector` observes.
    ///
    /// An object modified into the selector arrives as `Added`; one modified
    /// out of it arrives as `Deleted` carrying its new state.
    fn project(&self, selector: &BTreeMap<String, String>) -> Option<WatchEvent> {
        match &self.event {
            WatchEvent::Bookmark { .. } => Some(self.event.clone()),
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => {
                matches_selector(obj, selector).then(|| self.event.clone())
            }
            WatchEvent::Modified(obj) => {
                let was = self
                    .previous
                    .as_ref()
                    .is_none_or(|previous| matches_selector(previous, selector));
                match (was, matches_selector(obj, selector)) {
                    (true, true) => Some(self.event.clone()),
                    (false, true) => Some(WatchEvent::Added(obj.clone())),
                    (true, false) => Some(WatchEvent::Deleted(obj.clone())),
                    (false, false) => None,
                }
            }
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceKey, DynamicObject>,
    version: u64,
    history: VecDeque<Change>,
    compacted: u64,
    watchers: Vec<Watcher>,
    failing_lists: u32,
    next_uid: u64,
    list_calls: u64,
    watch_calls: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version = self.version.saturating_add(1);
        self.version
    }

    fn record(&mut self, change: Change, limit: usize) {
        self.watchers.retain(|watcher| watcher.send(&change));
        self.history.push_back(change);
        while self.history.len() > limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.event.resource_version().unwrap_or(self.compacted);
            }
        }
    }
}

/// A [`ResourceSource`] backed by memory.
pub struct MemorySource {
    state: Mutex<State>,
    history_limit: usize,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create an empty source retaining at most `limit` events for resuming watches.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            history_limit: limit.max(1),
        }
    }

    /// Create or replace an object. Returns the stored state with its new version.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyComputation` if the object has no name.
    pub fn apply(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::from_object(&obj)?;
        let mut state = self.lock();
        let version = state.next_version();
        obj.metadata.resource_version = Some(version);

        let event = match state.objects.get(&key) {
            Some(existing) => {
                obj.metadata.uid.clone_from(&existing.metadata.uid);
                WatchEvent::Modified(obj.clone())
            }
            None => {
                state.next_uid = state.next_uid.saturating_add(1);
                obj.metadata.uid = Some(format!("uid-{}", state.next_uid));
                WatchEvent::Added(obj.clone())
            }
        };

        debug!(resource = %key, version, kind = event.event_type(), "SOURCE: Applied object");
        let previous = state.objects.insert(key, obj.clone());
        state.record(Change { event, previous }, self.history_limit);
        Ok(obj)
    }

    /// Remove an object. Returns its final state, or `None` if it did not exist.
    pub fn delete(&self, key: &ResourceKey) -> Option<DynamicObject> {
        let mut state = self.lock();
        let mut obj = state.objects.remove(key)?;
        let version = state.next_version();
        obj.metadata.resource_version = Some(version);

        debug!(resource = %key, version, "SOURCE: Deleted object");
        let change = Change {
            event: WatchEvent::Deleted(obj.clone()),
            previous: None,
        };
        state.record(change, self.history_limit);
        Some(obj)
    }

    /// Current state of one object.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Keys of every stored object, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Latest version handed out.
    #[must_use]
    pub fn resource_version(&self) -> u64 {
        self.lock().version
    }

    /// End every open watch stream cleanly.
    pub fn disconnect_watchers(&self) {
        let watchers = std::mem::take(&mut self.lock().watchers);
        debug!(count = watchers.len(), "SOURCE: Disconnecting watchers");
    }

    /// End every open watch stream with an error.
    pub fn fail_watchers(&self, reason: &str) {
        let watchers = std::mem::take(&mut self.lock().watchers);
        for watcher in watchers {
            let _ = watcher.sender.unbounded_send(Err(Error::source(reason)));
        }
    }

    /// Drop the whole event history. Watches resuming from older versions expire.
    pub fn compact(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.compacted = state.version;
    }

    /// Make the next `count` list calls fail.
    pub fn fail_next_lists(&self, count: u32) {
        self.lock().failing_lists = count;
    }

    /// Number of list calls served or refused so far.
    #[must_use]
    pub fn list_calls(&self) -> u64 {
        self.lock().list_calls
    }

    /// Number of watch calls served or refused so far.
    #[must_use]
    pub fn watch_calls(&self) -> u64 {
        self.lock().watch_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList> {
        let mut state = self.lock();
        state.list_calls = state.list_calls.saturating_add(1);

        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(Error::source("list refused"));
        }

        let items = state
            .objects
            .values()
            .filter(|obj| matches_selector(obj, &options.label_selector))
            .cloned()
            .collect();

        Ok(ObjectList {
            items,
            resource_version: state.version,
        })
    }

    async fn watch(&self, options: &WatchOptions) -> Result<WatchStream> {
        let mut state = self.lock();
        state.watch_calls = state.watch_calls.saturating_add(1);

        if options.resource_version < state.compacted {
            return Err(Error::WatchExpired {
                version: options.resource_version,
            });
        }

        let (sender, receiver) = mpsc::unbounded();
        let watcher = Watcher {
            sender,
            selector: options.label_selector.clone(),
        };

        let replay = state
            .history
            .iter()
            .filter(|change| {
                change
                    .event
                    .resource_version()
                    .is_some_and(|version| version > options.resource_version)
            })
            .all(|change| watcher.send(change));

        if replay {
            state.watchers.push(watcher);
        }
        Ok(receiver.boxed())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn sample(name: &str) -> DynamicObject {
        DynamicObject::new(name).with_namespace("default")
    }

    #[tokio::test]
    async fn test_apply_assigns_versions_and_uid() {
        let source = MemorySource::new();
        let first = source.apply(sample("a")).unwrap();
        let second = source.apply(sample("a")).unwrap();

        assert_eq!(first.resource_version(), Some(1));
        assert_eq!(second.resource_version(), Some(2));
        assert_eq!(first.metadata.uid, second.metadata.uid);

        let list = source.list(&ListOptions::default()).await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.resource_version, 2);
    }

    #[tokio::test]
    async fn test_watch_replays_history_after_token() {
        let source = MemorySource::new();
        source.apply(sample("a")).unwrap();
        source.apply(sample("b")).unwrap();
        source.delete(&ResourceKey::from("default/a"));

        let mut stream = source
            .watch(&WatchOptions {
                resource_version: 1,
                ..WatchOptions::default()
            })
            .await
            .unwrap();
        source.disconnect_watchers();

        let mut types = Vec::new();
        while let Some(event) = stream.next().await {
            types.push(event.unwrap().event_type());
        }
        assert_eq!(types, vec!["added", "deleted"]);
    }

    #[tokio::test]
    async fn test_watch_from_compacted_version_expires() {
        let source = MemorySource::new();
        source.apply(sample("a")).unwrap();
        source.compact();
        source.apply(sample("b")).unwrap();

        let result = source.watch(&WatchOptions::default()).await;
        assert!(matches!(result, Err(Error::WatchExpired { version: 0 })));

        let current = source
            .watch(&WatchOptions {
                resource_version: 1,
                ..WatchOptions::default()
            })
            .await;
        assert!(current.is_ok());
    }

    #[tokio::test]
    async fn test_history_limit_compacts_oldest() {
        let source = MemorySource::with_history_limit(2);
        for name in ["a", "b", "c"] {
            source.apply(sample(name)).unwrap();
        }

        let result = source.watch(&WatchOptions::default()).await;
        assert!(matches!(result, Err(Error::WatchExpired { .. })));
    }

    #[tokio::test]
    async fn test_fail_next_lists() {
        let source = MemorySource::new();
        source.fail_next_lists(1);

        assert!(source.list(&ListOptions::default()).await.is_err());
        assert!(source.list(&ListOptions::default()).await.is_ok());
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_label_selector_filters_list() {
        let source = MemorySource::new();
        let mut labelled = sample("a");
        labelled
            .metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        source.apply(labelled).unwrap();
        source.apply(sample("b")).unwrap();

        let mut options = ListOptions::default();
        options
            .label_selector
            .insert("app".to_string(), "web".to_string());
        let list = source.list(&options).await.unwrap();

        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].name(), "a");
    }

    #[tokio::test]
    async fn test_watch_projects_selector_transitions() {
        let source = MemorySource::new();
        let web = |app: &str| {
            let mut obj = sample("a");
            obj.metadata.labels.insert("app".to_string(), app.to_string());
            obj
        };
        source.apply(web("db")).unwrap();

        let mut options = WatchOptions::default();
        options
            .label_selector
            .insert("app".to_string(), "web".to_string());
        let mut stream = source.watch(&options).await.unwrap();

        source.apply(web("web")).unwrap();
        source.apply(web("web")).unwrap();
        source.apply(web("db")).unwrap();
        source.apply(web("cache")).unwrap();
        source.delete(&ResourceKey::from("default/a"));
        source.disconnect_watchers();

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            seen.push((event.event_type(), event.resource_version()));
        }
        assert_eq!(
            seen,
            vec![("added", Some(2)), ("modified", Some(3)), ("deleted", Some(4))]
        );
    }
}
