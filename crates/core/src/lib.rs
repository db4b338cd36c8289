//! # Eddy Core
//!
//! Shared vocabulary for the Eddy controller: resource objects, canonical
//! keys, watch notifications, and the error taxonomy.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod key;
pub mod object;

pub use error::{Error, Result};
pub use event::{DeletedObject, Tombstone, TombstoneState, WatchEvent};
pub use key::ResourceKey;
pub use object::{DynamicObject, ObjectMeta};
