//! HTTP transport to the origin server.
//!
//! ### Pass-through
//! - Method, headers and body of the intercepted request are forwarded,
//!   minus hop-by-hop headers.
//! - Every response is returned, whatever its status. Only the absence of a
//!   response (DNS, connect, TLS, timeout, oversized body) is a failure.
//!
//! ### Response classification
//! - Final URL same-origin as the configured origin → `basic`
//! - Cross-origin with `Access-Control-Allow-Origin` → `cors`
//! - Any other cross-origin response → `opaque`
//!
//! ### Redirects
//! - Never followed here. A 3xx travels back with its `Location` and
//!   `Set-Cookie` headers so the browser performs the redirect itself and
//!   the response is stored under the URL that actually produced it.
//!
//! Timeouts belong to the transport: the strategies never impose their own.

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};

use ::url::Url;
use precache_core::{Error, NetworkFailure, Request, Response, ResponseType, Transport};

pub use self::url::{UrlError, canonicalize_origin, resolve_upstream, same_origin};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Origin the proxy fronts; decides `basic` vs cross-origin responses.
    pub origin: Url,

    /// User agent string (default: "precache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,
}

impl FetchConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            user_agent: "precache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
        }
    }
}

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    http: Client,
    config: FetchConfig,
}

impl HttpTransport {
    /// Create a new transport with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| NetworkFailure::new(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn response_type(&self, final_url: &Url, headers: &header::HeaderMap) -> ResponseType {
        if same_origin(&self.config.origin, final_url) {
            ResponseType::Basic
        } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkFailure> {
        let start = Instant::now();
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| NetworkFailure::new(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NetworkFailure::new(format!("network error: {e}")))?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(NetworkFailure::new(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkFailure::new(format!("failed to read response: {e}")))?;

        if body.len() > self.config.max_bytes {
            return Err(NetworkFailure::new(format!("{} bytes exceeds {}", body.len(), self.config.max_bytes)));
        }

        let response_type = self.response_type(&final_url, &headers);
        let headers = headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        tracing::debug!(
            url = %request.url,
            final_url = %final_url,
            status = status.as_u16(),
            response_type = response_type.as_str(),
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "fetched upstream"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            response_type,
            headers,
            body,
        })
    }
}
