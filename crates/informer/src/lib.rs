//! Eddy informer: materializes a resource collection into a local cache.
//!
//! An [`Informer`] lists a [`ResourceSource`], follows its watch stream, and
//! writes every change into a [`Store`] before telling its
//! [`ResourceEventHandler`]s about it. Disconnects are handled internally:
//! readers of the store never see reconnection.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod config;
mod handler;
mod informer;
mod memory;
mod source;
mod stop;
mod store;

pub use config::InformerConfig;
pub use handler::ResourceEventHandler;
pub use informer::Informer;
pub use memory::MemorySource;
pub use source::{
    ListOptions, ObjectList, ResourceSource, WatchOptions, WatchStream, matches_selector,
};
pub use stop::{pause, stopped};
pub use store::{ObjectCache, Store};
