//! The resource source seam: where snapshots and watch streams come from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eddy_core::{DynamicObject, Result, WatchEvent};
use futures::stream::BoxStream;

/// Stream of watch notifications. Ends when the connection drops.
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Options for a full listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only objects carrying all of these labels.
    pub label_selector: BTreeMap<String, String>,
}

/// Options for a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Deliver only events newer than this version.
    pub resource_version: u64,
    /// Only objects carrying all of these labels.
    pub label_selector: BTreeMap<String, String>,
}

/// A consistent snapshot of the collection.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    /// Objects at `resource_version`.
    pub items: Vec<DynamicObject>,
    /// Version the snapshot was taken at; watches resume from here.
    pub resource_version: u64,
}

/// Supplies snapshots and live change streams for a resource collection.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Take a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Source` if the listing cannot be produced.
    async fn list(&self, options: &ListOptions) -> Result<ObjectList>;

    /// Stream changes newer than `options.resource_version`.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatchExpired` if that version can no longer be resumed
    /// from, or `Error::Source` for connection failures.
    async fn watch(&self, options: &WatchOptions) -> Result<WatchStream>;
}

/// Whether an object carries every label in the selector.
#[must_use]
pub fn matches_selector(obj: &DynamicObject, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| obj.metadata.labels.get(key) == Some(value))
}
