//! Hierarchical key/value persistence for ephemera.
//!
//! Keys are slash-separated paths such as `ephemera/instances/web/pr-42`.
//! A [`Store`] supports point reads and writes, recursive prefix scans and a
//! compare-and-swap primitive for callers that need check-then-act semantics.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] (feature `memory`, on by default) for tests and single
//!   process deployments.
//! - [`ValkeyStore`] (feature `valkey`) backed by a Valkey/Redis server.
//!
//! [`from_config`] picks a backend from a [`StoreConfig`].

#![forbid(unsafe_code)]

mod config;
mod error;
pub mod path;
mod provider;
mod traits;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

pub use config::StoreConfig;
pub use error::StoreError;
pub use provider::from_config;
pub use traits::Store;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "valkey")]
pub use valkey::ValkeyStore;
