//! Change notifications delivered by the informer.

use std::sync::Arc;

use eddy_core::{DeletedObject, DynamicObject};

/// Receives cache changes after they have been applied to the store.
///
/// Called on the informer's delivery path: implementations must not block.
pub trait ResourceEventHandler: Send + Sync {
    /// An object appeared.
    fn on_add(&self, obj: &Arc<DynamicObject>);

    /// An object changed.
    fn on_update(&self, old: &Arc<DynamicObject>, new: &Arc<DynamicObject>);

    /// An object went away.
    fn on_delete(&self, deleted: &DeletedObject);
}
