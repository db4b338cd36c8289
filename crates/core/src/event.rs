//! Watch notifications and delete payloads.

use std::sync::Arc;

use crate::key::ResourceKey;
use crate::object::DynamicObject;

/// A single notification from a resource watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// An object was created.
    Added(DynamicObject),
    /// An object was changed.
    Modified(DynamicObject),
    /// An object was removed; carries its final state.
    Deleted(DynamicObject),
    /// Progress marker with no object change.
    Bookmark { resource_version: u64 },
}

impl WatchEvent {
    /// Version carried by this event, if any.
    #[must_use]
    pub const fn resource_version(&self) -> Option<u64> {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => {
                obj.metadata.resource_version
            }
            Self::Bookmark { resource_version } => Some(*resource_version),
        }
    }

    /// Short name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Bookmark { .. } => "bookmark",
        }
    }
}

/// Payload handed to delete handlers.
#[derive(Debug, Clone)]
pub enum DeletedObject {
    /// The delete was observed directly with the object's final state.
    Live(Arc<DynamicObject>),
    /// The object left the cache before its delete was observed.
    Tombstone(Tombstone),
    /// A payload of unknown shape.
    Unrecognized(serde_json::Value),
}

/// Synthetic delete record for an object whose delete notification was missed.
#[derive(Debug, Clone)]
pub struct Tombstone {
    /// Key the object was cached under.
    pub key: ResourceKey,
    /// Last state known for the object.
    pub last_known: TombstoneState,
}

/// What a tombstone was able to preserve.
#[derive(Debug, Clone)]
pub enum TombstoneState {
    /// The last cached object.
    Object(Arc<DynamicObject>),
    /// A value that could not be interpreted as an object.
    Opaque(serde_json::Value),
}

impl Tombstone {
    /// Tombstone carrying the last cached object.
    #[must_use]
    pub fn new(key: ResourceKey, last_known: Arc<DynamicObject>) -> Self {
        Self {
            key,
            last_known: TombstoneState::Object(last_known),
        }
    }

    /// Tombstone whose payload could not be decoded.
    #[must_use]
    pub fn opaque(key: ResourceKey, value: serde_json::Value) -> Self {
        Self {
            key,
            last_known: TombstoneState::Opaque(value),
        }
    }
}
