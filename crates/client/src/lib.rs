//! Network transport for precache.
//!
//! This crate provides the HTTP fetch pipeline the proxy uses to reach the
//! origin server, plus URL helpers shared with the server.

pub mod fetch;

pub use fetch::{FetchConfig, HttpTransport};
pub use fetch::url::{UrlError, canonicalize_origin, resolve_upstream, same_origin};
