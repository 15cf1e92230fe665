//! Request and response model shared by the classifier, the strategies and
//! the network transport.
//!
//! Requests are read-only descriptors. Responses own their body and are
//! deliberately not `Clone`: a response handed to the cache must be produced
//! with [`Response::duplicate`] so the caller always receives an unconsumed copy.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NetworkFailure;

/// Message used in the synthesised offline body for dynamic endpoints.
pub const DEFAULT_OFFLINE_MESSAGE: &str = "This feature requires internet connection";

/// HTTP method, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Method(String);

impl Method {
    pub fn new(method: &str) -> Self {
        Self(method.trim().to_ascii_uppercase())
    }

    pub fn get() -> Self {
        Self("GET".into())
    }

    pub fn is_get(&self) -> bool {
        self.0 == "GET"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetch mode of the incoming request (`Sec-Fetch-Mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` value. Anything unrecognised is treated as
    /// `no-cors`, never as a navigation.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Self::Navigate,
            "same-origin" => Self::SameOrigin,
            "cors" => Self::Cors,
            _ => Self::NoCors,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::SameOrigin => "same-origin",
            Self::NoCors => "no-cors",
            Self::Cors => "cors",
        }
    }
}

/// An intercepted fetch descriptor.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub mode: RequestMode,
    /// Request destination such as `document` or `image`; empty when unknown.
    pub destination: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    /// A plain GET, as issued for manifest entries.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::get(),
            mode: RequestMode::NoCors,
            destination: String::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A top-level document load.
    pub fn navigate(url: Url) -> Self {
        Self { mode: RequestMode::Navigate, destination: "document".into(), ..Self::get(url) }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Method::new(method);
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Identity of this request inside a cache store.
    pub fn cache_key(&self) -> String {
        crate::cache::hash::request_key(&self.method, &self.url)
    }
}

/// Classification of a response, following the fetch standard's response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response that passed CORS.
    Cors,
    /// Cross-origin response whose contents are not visible.
    Opaque,
    /// Network error placeholder.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Cors => "cors",
            Self::Opaque => "opaque",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "basic" => Self::Basic,
            "cors" => Self::Cors,
            "opaque" => Self::Opaque,
            _ => Self::Error,
        }
    }

    /// Same-origin or cross-origin-simple: the only types eligible for storage.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Basic | Self::Cors)
    }
}

/// A response as produced by the transport or synthesised locally.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub response_type: ResponseType,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, response_type: ResponseType, body: impl Into<Bytes>) -> Self {
        Self { status, status_text: String::new(), response_type, headers: Vec::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_status_text(mut self, text: &str) -> Self {
        self.status_text = text.to_string();
        self
    }

    /// Second consumer of the same response, e.g. for a cache write.
    pub fn duplicate(&self) -> Self {
        Self {
            status: self.status,
            status_text: self.status_text.clone(),
            response_type: self.response_type,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 503 with a JSON `{error, message}` body, returned for dynamic endpoints
    /// when the network is unreachable.
    pub fn offline_json(message: &str) -> Self {
        let body = serde_json::json!({ "error": "Offline", "message": message }).to_string();
        Self::new(503, ResponseType::Basic, body)
            .with_status_text("Service Unavailable")
            .with_header("Content-Type", "application/json")
    }

    /// Empty 404 substituted for a static asset that is neither cached nor reachable.
    pub fn not_found() -> Self {
        Self::new(404, ResponseType::Basic, Bytes::new()).with_status_text("Not Found")
    }
}

/// Outbound network access. The only way the core reaches origin servers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a request. Any obtained response, whatever its status, is `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkFailure>;
}
