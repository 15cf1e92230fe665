//! Core types and caching policy engine for precache.
//!
//! This crate provides:
//! - Versioned cache storage with a SQLite backend
//! - The request classifier and the three caching strategies
//! - The install/activate lifecycle and the event-driven worker
//! - Unified error types and layered configuration

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod strategy;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStorage, Snapshot};
pub use classify::{Classifier, PolicyClass};
pub use config::AppConfig;
pub use error::{Error, NetworkFailure};
pub use http::{Method, Request, RequestMode, Response, ResponseType, Transport};
pub use lifecycle::{LifecycleConfig, LifecycleManager, LifecycleState, Manifest};
pub use strategy::StrategyExecutor;
pub use worker::{Worker, WorkerHandle};
