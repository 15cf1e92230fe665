//! HTTP surface of the proxy.
//!
//! Every request that does not hit an internal route is translated into a
//! core [`Request`], handed to the worker, and the resulting [`Response`] is
//! relayed back verbatim.
//!
//! The browser's fetch metadata decides how a request is classified:
//! `Sec-Fetch-Mode: navigate` marks a page navigation, and
//! `Sec-Fetch-Dest` is carried along for logging. Clients that send no
//! fetch metadata are treated as `no-cors` subresource loads.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request as HttpRequest, State};
use axum::http::{HeaderMap, Response as HttpResponse, StatusCode};
use axum::routing::{get, post};
use url::Url;

use precache_client::resolve_upstream;
use precache_core::{CacheStorage, Method, Request, RequestMode, Response, WorkerHandle};

use crate::error::ProxyError;
use crate::admin;

/// Internal route reporting lifecycle and cache contents.
pub const STATUS_PATH: &str = "/__precache/status";

/// Internal route activating a waiting version.
pub const ACTIVATE_PATH: &str = "/__precache/activate";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub(crate) worker: WorkerHandle,
    pub(crate) storage: CacheStorage,
    origin: Url,
    max_body: usize,
}

impl ProxyState {
    pub fn new(worker: WorkerHandle, storage: CacheStorage, origin: Url, max_body: usize) -> Self {
        Self { worker, storage, origin, max_body }
    }
}

/// Build the proxy router.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(admin::status))
        .route(ACTIVATE_PATH, post(admin::activate))
        .fallback(forward)
        .with_state(state)
}

async fn forward(State(state): State<ProxyState>, request: HttpRequest) -> Result<HttpResponse<Body>, ProxyError> {
    let request = into_core_request(&state, request).await?;
    let response = state.worker.fetch(request).await?;
    into_http_response(response)
}

async fn into_core_request(state: &ProxyState, request: HttpRequest) -> Result<Request, ProxyError> {
    let (parts, body) = request.into_parts();

    let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = resolve_upstream(&state.origin, target)?;

    let body = to_bytes(body, state.max_body)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read request body: {e}")))?;

    let mode = header_str(&parts.headers, "sec-fetch-mode")
        .map(RequestMode::parse)
        .unwrap_or(RequestMode::NoCors);
    let destination = header_str(&parts.headers, "sec-fetch-dest").unwrap_or_default().to_string();

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    Ok(Request { url, method: Method::new(parts.method.as_str()), mode, destination, headers, body })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn into_http_response(response: Response) -> Result<HttpResponse<Body>, ProxyError> {
    let status = StatusCode::from_u16(response.status)
        .map_err(|e| ProxyError::Upstream(format!("invalid status {}: {e}", response.status)))?;

    let mut builder = HttpResponse::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Body::from(response.body))
        .map_err(|e| ProxyError::Upstream(format!("failed to relay response: {e}")))
}
