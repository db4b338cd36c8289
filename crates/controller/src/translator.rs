//! Turns cache notifications into queue keys.

use std::borrow::Cow;
use std::sync::Arc;

use eddy_core::{
    DeletedObject, DynamicObject, Error, ResourceKey, Result, Tombstone, TombstoneState,
};
use eddy_informer::ResourceEventHandler;
use eddy_queue::WorkQueue;
use tracing::{error, info};

use crate::stats::Counters;

/// Enqueues the key of every changed object.
///
/// Runs on the informer's delivery path: it only computes keys and calls
/// [`WorkQueue::add`], which never blocks.
pub struct EventTranslator {
    queue: Arc<WorkQueue<ResourceKey>>,
    counters: Arc<Counters>,
}

impl EventTranslator {
    pub(crate) fn new(queue: Arc<WorkQueue<ResourceKey>>, counters: Arc<Counters>) -> Self {
        Self { queue, counters }
    }

    fn enqueue(&self, event: &'static str, obj: &DynamicObject) {
        match ResourceKey::from_object(obj) {
            Ok(key) => {
                info!(
                    event,
                    resource = %key,
                    name = obj.name(),
                    namespace = obj.namespace().unwrap_or_default(),
                    kind = obj.kind().unwrap_or_default(),
                    "EVENT: Resource changed, queueing"
                );
                self.queue.add(key);
            }
            Err(e) => self.reject(event, &e),
        }
    }

    fn reject(&self, event: &'static str, error: &Error) {
        error!(event, error = %error, "EVENT: Dropping notification");
        self.counters.dropped();
    }
}

/// Recover the last known object preserved by a tombstone.
fn tombstone_object(tombstone: &Tombstone) -> Result<Cow<'_, DynamicObject>> {
    match &tombstone.last_known {
        TombstoneState::Object(obj) => Ok(Cow::Borrowed(obj.as_ref())),
        TombstoneState::Opaque(value) => serde_json::from_value(value.clone())
            .map(Cow::Owned)
            .map_err(|e| {
                Error::tombstone_decode(format!("tombstone for '{}': {e}", tombstone.key))
            }),
    }
}

impl ResourceEventHandler for EventTranslator {
    fn on_add(&self, obj: &Arc<DynamicObject>) {
        self.enqueue("added", obj);
    }

    fn on_update(&self, _old: &Arc<DynamicObject>, new: &Arc<DynamicObject>) {
        self.enqueue("updated", new);
    }

    fn on_delete(&self, deleted: &DeletedObject) {
        match deleted {
            DeletedObject::Live(obj) => self.enqueue("deleted", obj),
            DeletedObject::Tombstone(tombstone) => match tombstone_object(tombstone) {
                Ok(obj) => self.enqueue("deleted", &obj),
                Err(e) => self.reject("deleted", &e),
            },
            DeletedObject::Unrecognized(value) => self.reject(
                "deleted",
                &Error::tombstone_decode(format!("unrecognized delete payload: {value}")),
            ),
        }
    }
}
