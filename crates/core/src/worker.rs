//! Event-driven worker.
//!
//! The proxy talks to the core only through a [`WorkerHandle`], which turns
//! each call into an [`Event`] on a bounded queue. Every event gets exactly
//! one reply.
//!
//! - Lifecycle events (install, activate) are serialised behind one lock.
//! - Each fetch is handled in its own task with whichever executor is in
//!   control when the event is dequeued, so an install in progress never
//!   stalls request handling.
//! - Before handling any event the worker resumes the store recorded as
//!   active by an earlier process, so a restart while the origin is down
//!   still serves offline.
//! - Until a version is active, fetches go straight to the network.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};

use crate::cache::CacheStorage;
use crate::classify::Classifier;
use crate::error::Error;
use crate::http::{Request, Response, Transport};
use crate::lifecycle::{LifecycleConfig, LifecycleManager, LifecycleState};
use crate::strategy::StrategyExecutor;

const QUEUE_CAPACITY: usize = 1024;

/// Messages accepted by the worker loop.
#[derive(Debug)]
pub enum Event {
    Install { reply: oneshot::Sender<Result<LifecycleState, Error>> },
    Activate { reply: oneshot::Sender<Result<LifecycleState, Error>> },
    Fetch { request: Request, reply: oneshot::Sender<Result<Response, Error>> },
}

struct Inner {
    storage: CacheStorage,
    transport: Arc<dyn Transport>,
    config: LifecycleConfig,
    classifier: Classifier,
    /// Version that finished installing and is waiting for activation.
    waiting: Mutex<Option<LifecycleManager>>,
    controller: RwLock<Option<Arc<StrategyExecutor>>>,
    state: watch::Sender<LifecycleState>,
}

/// Owner of the event loop.
pub struct Worker {
    inner: Arc<Inner>,
    events: mpsc::Receiver<Event>,
}

/// Cloneable sender side of the worker queue.
#[derive(Clone)]
pub struct WorkerHandle {
    events: mpsc::Sender<Event>,
    inner: Arc<Inner>,
}

impl Worker {
    /// Start the event loop on the current runtime.
    pub fn spawn(
        storage: CacheStorage, transport: Arc<dyn Transport>, config: LifecycleConfig, classifier: Classifier,
    ) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        let inner = Arc::new(Inner {
            storage,
            transport,
            config,
            classifier,
            waiting: Mutex::new(None),
            controller: RwLock::new(None),
            state,
        });

        let worker = Worker { inner: inner.clone(), events: rx };
        tokio::spawn(worker.run());

        WorkerHandle { events: tx, inner }
    }

    async fn run(mut self) {
        self.inner.resume().await;

        while let Some(event) = self.events.recv().await {
            let inner = self.inner.clone();
            match event {
                Event::Fetch { request, reply } => {
                    let controller = inner.controller.read().await.clone();
                    tokio::spawn(async move {
                        let result = match controller {
                            Some(executor) => executor.handle(&request).await,
                            None => inner.transport.fetch(&request).await.map_err(Error::from),
                        };
                        // A dropped receiver means the caller went away mid-request.
                        let _ = reply.send(result);
                    });
                }
                Event::Install { reply } => {
                    tokio::spawn(async move {
                        let _ = reply.send(inner.install().await);
                    });
                }
                Event::Activate { reply } => {
                    tokio::spawn(async move {
                        let _ = reply.send(inner.activate().await);
                    });
                }
            }
        }
        tracing::debug!("worker event queue closed");
    }
}

impl Inner {
    fn publish(&self, state: LifecycleState) {
        self.state.send_replace(state);
    }

    async fn active_version(&self) -> Option<String> {
        self.controller
            .read()
            .await
            .as_ref()
            .map(|executor| executor.version().to_string())
    }

    /// Put the recorded active store back in control. Failures leave the
    /// worker uncontrolled; the next install starts from scratch.
    async fn resume(&self) {
        let manager = match LifecycleManager::resume(self.storage.clone(), self.config.clone()).await {
            Ok(Some(manager)) => manager,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "could not read the active cache version");
                return;
            }
        };

        match manager.executor(self.transport.clone(), self.classifier.clone()) {
            Ok(executor) => {
                *self.controller.write().await = Some(Arc::new(executor));
                self.publish(LifecycleState::Active);
            }
            Err(e) => tracing::warn!(version = manager.version(), error = %e, "could not resume cache version"),
        }
    }

    async fn install(&self) -> Result<LifecycleState, Error> {
        let mut waiting = self.waiting.lock().await;

        if self.active_version().await.as_deref() == Some(self.config.version.as_str()) {
            tracing::debug!(version = %self.config.version, "version already active, skipping install");
            return Ok(LifecycleState::Active);
        }
        if let Some(manager) = waiting.as_ref() {
            return Ok(manager.state());
        }

        let mut manager = LifecycleManager::new(self.storage.clone(), self.config.clone());
        self.publish(LifecycleState::Installing);
        if let Err(e) = manager.initialize(self.transport.as_ref()).await {
            self.publish(manager.state());
            return Err(e);
        }
        self.publish(manager.state());

        if manager.ready_to_take_over() {
            return self.promote(manager).await;
        }

        let state = manager.state();
        *waiting = Some(manager);
        Ok(state)
    }

    async fn activate(&self) -> Result<LifecycleState, Error> {
        let mut waiting = self.waiting.lock().await;

        if let Some(manager) = waiting.take() {
            return self.promote(manager).await;
        }
        if self.active_version().await.is_some() {
            return Ok(LifecycleState::Active);
        }
        Err(Error::InvalidState("no installed version is waiting to activate".into()))
    }

    /// Activate `manager` and hand it control. Must be called with the
    /// lifecycle lock held.
    async fn promote(&self, mut manager: LifecycleManager) -> Result<LifecycleState, Error> {
        self.publish(LifecycleState::Activating);
        if let Err(e) = manager.activate().await {
            self.publish(manager.state());
            return Err(e);
        }

        let executor = manager.executor(self.transport.clone(), self.classifier.clone())?;
        let previous = self.controller.write().await.replace(Arc::new(executor));
        if let Some(previous) = previous {
            tracing::info!(from = previous.version(), to = %self.config.version, "cache version superseded");
        }

        self.publish(LifecycleState::Active);
        Ok(LifecycleState::Active)
    }
}

impl WorkerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.events.send(build(reply)).await.map_err(|_| Error::WorkerClosed)?;
        rx.await.map_err(|_| Error::WorkerClosed)
    }

    /// Install the configured version; activates immediately with skip_waiting.
    pub async fn install(&self) -> Result<LifecycleState, Error> {
        self.request(|reply| Event::Install { reply }).await?
    }

    /// Activate an installed version that is waiting.
    pub async fn activate(&self) -> Result<LifecycleState, Error> {
        self.request(|reply| Event::Activate { reply }).await?
    }

    /// Handle one intercepted request.
    pub async fn fetch(&self, request: Request) -> Result<Response, Error> {
        self.request(|reply| Event::Fetch { request, reply }).await?
    }

    /// Lifecycle state of the most recent install/activate attempt.
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Store name currently in control, if any.
    pub async fn active_version(&self) -> Option<String> {
        self.inner.active_version().await
    }

    /// Wait for outstanding background cache writes of the active version.
    pub async fn flush(&self) {
        let controller = self.inner.controller.read().await.clone();
        if let Some(executor) = controller {
            executor.flush().await;
        }
    }
}
