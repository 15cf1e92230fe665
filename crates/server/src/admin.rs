//! Operator routes.
//!
//! - `GET /__precache/status` lists every store with its entries (bodies
//!   omitted) next to the current lifecycle state.
//! - `POST /__precache/activate` hands control to an installed version that
//!   is waiting, for deployments running with `skip_waiting = false`.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use precache_core::cache::EntryInfo;

use crate::error::ProxyError;
use crate::proxy::ProxyState;

/// Output of the status route.
#[derive(Debug, Serialize)]
pub struct StatusOutput {
    /// Lifecycle state of the most recent install/activate attempt.
    pub state: String,
    /// Store currently serving requests.
    pub active_version: Option<String>,
    pub stores: Vec<StoreStatus>,
}

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub name: String,
    pub entries: Vec<EntryInfo>,
}

pub async fn status(State(state): State<ProxyState>) -> Result<Json<StatusOutput>, ProxyError> {
    let mut stores = Vec::new();
    for name in state.storage.store_names().await? {
        let entries = state.storage.entries(&name).await?;
        stores.push(StoreStatus { name, entries });
    }

    Ok(Json(StatusOutput {
        state: state.worker.state().as_str().to_string(),
        active_version: state.worker.active_version().await,
        stores,
    }))
}

/// Output of the activate route.
#[derive(Debug, Serialize)]
pub struct ActivateOutput {
    pub state: String,
    pub active_version: Option<String>,
}

pub async fn activate(State(state): State<ProxyState>) -> Result<Json<ActivateOutput>, ProxyError> {
    let lifecycle = state.worker.activate().await?;
    let active_version = state.worker.active_version().await;
    tracing::info!(state = %lifecycle, version = ?active_version, "activation requested");

    Ok(Json(ActivateOutput { state: lifecycle.as_str().to_string(), active_version }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::proxy::{ACTIVATE_PATH, STATUS_PATH};
    use crate::proxy::tests::{StubTransport, app, body_string};

    fn status_request() -> Request<Body> {
        Request::builder().uri(STATUS_PATH).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_status_lists_active_store() {
        let (app, _) = app(Arc::new(StubTransport::new()), true).await;

        let response = app.oneshot(status_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["state"], "active");
        assert_eq!(body["active_version"], "precache-v1");
        assert_eq!(body["stores"][0]["name"], "precache-v1");
        assert_eq!(body["stores"][0]["entries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_before_install() {
        let (app, _) = app(Arc::new(StubTransport::new()), false).await;

        let response = app.oneshot(status_request()).await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["state"], "uninitialized");
        assert!(body["active_version"].is_null());
        assert_eq!(body["stores"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_activate_without_waiting_version_is_conflict() {
        let (app, _) = app(Arc::new(StubTransport::new()), false).await;

        let request = Request::builder().method("POST").uri(ACTIVATE_PATH).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_activate_when_already_active() {
        let (app, _) = app(Arc::new(StubTransport::new()), true).await;

        let request = Request::builder().method("POST").uri(ACTIVATE_PATH).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["state"], "active");
        assert_eq!(body["active_version"], "precache-v1");
    }
}
