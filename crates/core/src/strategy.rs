//! Strategy execution for classified requests.
//!
//! ### Network first (navigation)
//! - Live response is returned; a duplicate is stored in the background.
//! - On network failure the offline document is served if stored, otherwise
//!   the failure propagates.
//!
//! ### Network only (dynamic)
//! - Any obtained response is returned verbatim, whatever its status.
//! - On network failure a 503 JSON body is synthesised.
//! - The store is never read or written.
//!
//! ### Cache first (static)
//! - A stored snapshot is returned unconditionally, without revalidation.
//! - Otherwise the network response is returned, and stored in the background
//!   when it is a GET with status 200 of type basic or cors.
//! - On network failure with nothing stored, an empty 404 is synthesised.
//!
//! Cache writes are detached tasks: spawned before the response is returned,
//! never awaited by it. Write failures are logged and swallowed; read failures
//! count as misses.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::cache::hash::request_key;
use crate::cache::{CacheStorage, Snapshot};
use crate::classify::{Classifier, PolicyClass};
use crate::error::Error;
use crate::http::{Method, Request, Response, Transport};
use crate::lifecycle::LifecycleConfig;

/// Executes the caching policy for the current cache version.
pub struct StrategyExecutor {
    storage: CacheStorage,
    config: LifecycleConfig,
    transport: Arc<dyn Transport>,
    classifier: Classifier,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl StrategyExecutor {
    pub fn new(
        storage: CacheStorage, config: LifecycleConfig, transport: Arc<dyn Transport>, classifier: Classifier,
    ) -> Self {
        Self { storage, config, transport, classifier, pending_writes: Mutex::new(Vec::new()) }
    }

    /// Name of the store this executor reads and writes.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn classify(&self, request: &Request) -> PolicyClass {
        self.classifier.classify(request)
    }

    /// Produce exactly one response, or the navigation network failure.
    pub async fn handle(&self, request: &Request) -> Result<Response, Error> {
        let class = self.classify(request);
        tracing::debug!(
            url = %request.url,
            method = %request.method,
            mode = request.mode.as_str(),
            destination = %request.destination,
            class = class.as_str(),
            "handling fetch"
        );

        self.execute(class, request).await
    }

    /// Run the algorithm for an already-classified request.
    pub async fn execute(&self, class: PolicyClass, request: &Request) -> Result<Response, Error> {
        match class {
            PolicyClass::Navigation => self.network_first(request).await,
            PolicyClass::Dynamic => Ok(self.network_only(request).await),
            PolicyClass::Static => Ok(self.cache_first(request).await),
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response, Error> {
        let failure = match self.transport.fetch(request).await {
            Ok(response) => {
                self.store_in_background(request, response.duplicate());
                return Ok(response);
            }
            Err(failure) => failure,
        };

        if self.config.navigation_cache_fallback
            && let Some(snapshot) = self.lookup(&request.cache_key()).await
        {
            tracing::info!(url = %request.url, "navigation failed, serving stored page");
            return Ok(snapshot.to_response());
        }

        let offline_key = request_key(&Method::get(), &self.config.offline_document);
        match self.lookup(&offline_key).await {
            Some(snapshot) => {
                tracing::info!(url = %request.url, reason = %failure, "navigation failed, serving offline page");
                Ok(snapshot.to_response())
            }
            None => {
                tracing::warn!(url = %request.url, reason = %failure, "navigation failed and no offline page is stored");
                Err(Error::Network(failure))
            }
        }
    }

    async fn network_only(&self, request: &Request) -> Response {
        match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(failure) => {
                tracing::info!(url = %request.url, reason = %failure, "dynamic request failed, returning offline error");
                Response::offline_json(&self.config.offline_message)
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Response {
        if let Some(snapshot) = self.lookup(&request.cache_key()).await {
            tracing::debug!(url = %request.url, "serving from cache");
            return snapshot.to_response();
        }

        match self.transport.fetch(request).await {
            Ok(response) => {
                if is_storable(request, &response) {
                    self.store_in_background(request, response.duplicate());
                }
                response
            }
            Err(failure) => {
                tracing::debug!(url = %request.url, reason = %failure, "static fetch failed, returning 404");
                Response::not_found()
            }
        }
    }

    /// Store read; a failing read is reported as a miss.
    async fn lookup(&self, key: &str) -> Option<Snapshot> {
        match self.storage.get(&self.config.version, key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(store = %self.config.version, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Spawn a detached write of `copy`. The caller keeps its own response.
    fn store_in_background(&self, request: &Request, copy: Response) {
        let snapshot = Snapshot::capture(request, copy);
        let storage = self.storage.clone();
        let store = self.config.version.clone();

        let handle = tokio::spawn(async move {
            match storage.put(&store, &snapshot).await {
                Ok(()) => tracing::debug!(store = %store, url = snapshot.url(), "stored response"),
                Err(e) => tracing::warn!(store = %store, url = snapshot.url(), error = %e, "cache write failed"),
            }
        });

        let mut pending = self.pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every background write spawned so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background cache write did not complete");
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.pending_writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(lock_kind = "mutex.lock", result = "poisoned_recovered", "recovered pending write list");
                poisoned.into_inner()
            }
        }
    }
}

fn is_storable(request: &Request, response: &Response) -> bool {
    request.method.is_get() && response.status == 200 && response.response_type.is_cacheable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{RequestMode, ResponseType};
    use crate::lifecycle::{LifecycleManager, Manifest};
    use crate::testing::ScriptedTransport;
    use url::Url;

    const ORIGIN: &str = "http://school.local";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn config(manifest: &[&str], offline_document: &str) -> LifecycleConfig {
        let origin = Url::parse(ORIGIN).unwrap();
        LifecycleConfig {
            version: "v1".into(),
            manifest: Manifest::resolve(&origin, manifest).unwrap(),
            offline_document: url(offline_document),
            offline_message: crate::http::DEFAULT_OFFLINE_MESSAGE.into(),
            navigation_cache_fallback: false,
            skip_waiting: true,
        }
    }

    fn scripted() -> ScriptedTransport {
        ScriptedTransport::new()
            .route("http://school.local/offline.html", 200, "<h1>You are offline</h1>")
            .route("http://school.local/static/offline.html", 200, "<h1>You are offline</h1>")
            .route("http://school.local/dashboard", 200, "<h1>Dashboard</h1>")
            .route("http://school.local/api/roster", 200, "[\"Ada\"]")
            .route("http://school.local/api/broken", 500, "{\"error\":\"db down\"}")
            .route("http://school.local/static/app.js", 200, "console.log('app')")
            .route("http://school.local/static/missing.js", 404, "nope")
            .route_typed("http://cdn.example/lib.js", 200, ResponseType::Opaque, "lib")
            .route_typed("http://cdn.example/font.woff", 200, ResponseType::Cors, "font")
    }

    async fn install(config: LifecycleConfig, transport: Arc<ScriptedTransport>) -> (CacheStorage, StrategyExecutor) {
        let storage = CacheStorage::open_in_memory().await.unwrap();
        let mut manager = LifecycleManager::new(storage.clone(), config);
        manager.initialize(transport.as_ref()).await.unwrap();
        manager.activate().await.unwrap();
        let executor = manager
            .executor(transport, Classifier::new(["/api/", "/teacher/"]))
            .unwrap();
        (storage, executor)
    }

    #[tokio::test]
    async fn test_navigation_online_returns_live_response_and_stores_copy() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&["/offline.html"], "/offline.html"), transport.clone()).await;
        let request = Request::navigate(url("/dashboard"));

        let response = executor.handle(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref(), b"<h1>Dashboard</h1>");

        executor.flush().await;
        let stored = storage.get("v1", &request.cache_key()).await.unwrap().unwrap();
        assert_eq!(stored.body(), &response.body);
    }

    #[tokio::test]
    async fn test_navigation_offline_serves_offline_document() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&["/offline.html"], "/offline.html"), transport.clone()).await;
        assert_eq!(storage.entry_count("v1").await.unwrap(), 1);

        transport.set_offline(true);
        let response = executor.handle(&Request::navigate(url("/dashboard"))).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref(), b"<h1>You are offline</h1>");
    }

    #[tokio::test]
    async fn test_navigation_offline_without_offline_document_fails() {
        let transport = Arc::new(scripted());
        let (_, executor) = install(config(&[], "/offline.html"), transport.clone()).await;

        transport.set_offline(true);
        let result = executor.handle(&Request::navigate(url("/dashboard"))).await;

        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_navigation_offline_ignores_visited_page_by_default() {
        let transport = Arc::new(scripted());
        let (_, executor) = install(config(&["/offline.html"], "/offline.html"), transport.clone()).await;
        let request = Request::navigate(url("/dashboard"));
        executor.handle(&request).await.unwrap();
        executor.flush().await;

        transport.set_offline(true);
        let response = executor.handle(&request).await.unwrap();
        assert_eq!(response.body.as_ref(), b"<h1>You are offline</h1>");
    }

    #[tokio::test]
    async fn test_navigation_cache_fallback_serves_visited_page() {
        let transport = Arc::new(scripted());
        let config = LifecycleConfig { navigation_cache_fallback: true, ..config(&["/offline.html"], "/offline.html") };
        let (_, executor) = install(config, transport.clone()).await;
        let request = Request::navigate(url("/dashboard"));
        executor.handle(&request).await.unwrap();
        executor.flush().await;

        transport.set_offline(true);
        let response = executor.handle(&request).await.unwrap();
        assert_eq!(response.body.as_ref(), b"<h1>Dashboard</h1>");

        let unvisited = executor.handle(&Request::navigate(url("/reports"))).await.unwrap();
        assert_eq!(unvisited.body.as_ref(), b"<h1>You are offline</h1>");
    }

    #[tokio::test]
    async fn test_navigation_store_failure_is_swallowed() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;
        storage.delete_store("v1").await.unwrap();

        let response = executor.handle(&Request::navigate(url("/dashboard"))).await.unwrap();
        executor.flush().await;

        assert_eq!(response.status, 200);
        assert!(!storage.has_store("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dynamic_offline_returns_json_503_and_leaves_store_untouched() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&["/offline.html"], "/offline.html"), transport.clone()).await;
        let before = storage.entry_count("v1").await.unwrap();

        transport.set_offline(true);
        let response = executor.handle(&Request::get(url("/api/roster"))).await.unwrap();
        executor.flush().await;

        assert_eq!(response.status, 503);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "Offline");
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        assert_eq!(storage.entry_count("v1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_dynamic_never_reads_or_writes_store() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;
        let request = Request::get(url("/api/roster"));
        let planted = Snapshot::capture(&request, Response::new(200, ResponseType::Basic, "stale roster"));
        storage.put("v1", &planted).await.unwrap();

        let online = executor.handle(&request).await.unwrap();
        assert_eq!(online.body.as_ref(), b"[\"Ada\"]");

        transport.set_offline(true);
        let offline = executor.handle(&request).await.unwrap();
        assert_eq!(offline.status, 503);

        executor.flush().await;
        let still = storage.get("v1", &request.cache_key()).await.unwrap().unwrap();
        assert_eq!(still.body().as_ref(), b"stale roster");
        assert_eq!(storage.entry_count("v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dynamic_passes_server_errors_through() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;

        let response = executor.handle(&Request::get(url("/api/broken"))).await.unwrap();
        executor.flush().await;

        assert_eq!(response.status, 500);
        assert_eq!(response.body.as_ref(), b"{\"error\":\"db down\"}");
        assert_eq!(storage.entry_count("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_static_repeat_served_from_store_without_network() {
        let transport = Arc::new(scripted());
        let (_, executor) = install(config(&[], "/offline.html"), transport.clone()).await;
        let request = Request::get(url("/static/app.js")).with_mode(RequestMode::NoCors);

        let first = executor.handle(&request).await.unwrap();
        executor.flush().await;
        let second = executor.handle(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.call_count("http://school.local/static/app.js"), 1);
    }

    #[tokio::test]
    async fn test_static_stores_cors_but_not_opaque() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;
        let font = Request::get(Url::parse("http://cdn.example/font.woff").unwrap());
        let lib = Request::get(Url::parse("http://cdn.example/lib.js").unwrap());

        executor.handle(&font).await.unwrap();
        let opaque = executor.handle(&lib).await.unwrap();
        executor.flush().await;

        assert_eq!(opaque.response_type, ResponseType::Opaque);
        assert!(storage.get("v1", &font.cache_key()).await.unwrap().is_some());
        assert!(storage.get("v1", &lib.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_does_not_store_errors_or_non_get() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;

        let missing = executor.handle(&Request::get(url("/static/missing.js"))).await.unwrap();
        let post = executor
            .handle(&Request::get(url("/static/app.js")).with_method("POST"))
            .await
            .unwrap();
        executor.flush().await;

        assert_eq!(missing.status, 404);
        assert_eq!(missing.body.as_ref(), b"nope");
        assert_eq!(post.status, 200);
        assert_eq!(storage.entry_count("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_static_offline_miss_returns_empty_404() {
        let transport = Arc::new(scripted());
        let (_, executor) = install(config(&[], "/offline.html"), transport.clone()).await;

        transport.set_offline(true);
        let response = executor.handle(&Request::get(url("/static/app.js"))).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_manifest_entry_round_trips_through_static_path() {
        let transport = Arc::new(scripted());
        let (_, executor) =
            install(config(&["/static/app.js", "/offline.html"], "/offline.html"), transport.clone()).await;
        let installed_calls = transport.calls().len();

        transport.set_offline(true);
        let response = executor.handle(&Request::get(url("/static/app.js"))).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref(), b"console.log('app')");
        assert_eq!(transport.calls().len(), installed_calls);
    }

    #[tokio::test]
    async fn test_concurrent_static_fetches_leave_single_entry() {
        let transport = Arc::new(scripted());
        let (storage, executor) = install(config(&[], "/offline.html"), transport.clone()).await;
        let request = Request::get(url("/static/app.js"));

        let (a, b) = tokio::join!(executor.handle(&request), executor.handle(&request));
        executor.flush().await;

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(storage.entry_count("v1").await.unwrap(), 1);
    }
}
