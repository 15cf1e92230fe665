//! Scripted in-process transport for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetworkFailure;
use crate::http::{Request, Response, ResponseType, Transport};

#[derive(Clone)]
struct Route {
    status: u16,
    response_type: ResponseType,
    body: Bytes,
}

/// Serves canned responses by URL and records every call.
///
/// Unknown URLs fail like an unreachable host; `set_offline(true)` fails
/// every request.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, status: u16, body: &'static str) -> Self {
        self.route_typed(url, status, ResponseType::Basic, body)
    }

    pub fn route_typed(self, url: &str, status: u16, response_type: ResponseType, body: &'static str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route { status, response_type, body: Bytes::from_static(body.as_bytes()) });
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkFailure> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkFailure::new("network unreachable"));
        }

        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            Some(route) => Ok(Response::new(route.status, route.response_type, route.body)),
            None => Err(NetworkFailure::new(format!("no route to {url}"))),
        }
    }
}
