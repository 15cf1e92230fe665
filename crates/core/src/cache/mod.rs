//! SQLite-backed cache storage for versioned response stores.
//!
//! Mirrors the browser cache storage model:
//!
//! - Any number of named stores, one per cache version
//! - Entries keyed by request identity (method + URL, SHA-256)
//! - Whole-value upserts, so an interrupted write never leaves a torn entry
//! - Whole-store deletion, used to evict superseded versions

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod snapshots;
pub mod stores;

pub use crate::Error;

pub use connection::CacheStorage;
pub use snapshots::{EntryInfo, Snapshot};
