//! Cache lifecycle: install, garbage collection and control claiming.
//!
//! ```text
//! Uninitialized → Installing → Installed → Activating → Active
//!                      ↘ InstallFailed
//! ```
//!
//! Install fetches the whole manifest before writing anything and then stores
//! it in a single transaction, so a version is either fully populated or never
//! promoted. Activation deletes every store whose name is not the current
//! version, records the version as active and only then claims control, so
//! two versions are never current at the same time.
//!
//! The active marker outlives the process: [`LifecycleManager::resume`] takes
//! control with the recorded store after a restart without touching the
//! network.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use url::Url;

use crate::cache::{CacheStorage, Snapshot};
use crate::classify::Classifier;
use crate::error::Error;
use crate::http::{Request, Transport};
use crate::strategy::StrategyExecutor;

/// Ordered, de-duplicated set of absolute resource URLs stored at install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<Url>,
}

impl Manifest {
    /// Resolve manifest paths against the origin. Later duplicates are dropped.
    pub fn resolve<S: AsRef<str>>(origin: &Url, paths: &[S]) -> Result<Self, url::ParseError> {
        let mut entries: Vec<Url> = Vec::with_capacity(paths.len());
        for path in paths {
            let url = origin.join(path.as_ref())?;
            if !entries.contains(&url) {
                entries.push(url);
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.entries.contains(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.entries.iter()
    }
}

/// Settings for one cache version, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub version: String,
    pub manifest: Manifest,
    pub offline_document: Url,
    pub offline_message: String,
    pub navigation_cache_fallback: bool,
    pub skip_waiting: bool,
}

/// Lifecycle state of one cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Installing,
    Installed,
    Activating,
    Active,
    InstallFailed,
}

/// Inputs that move a version through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    ActivationFailed,
    Activated,
}

impl LifecycleState {
    /// Apply an event, rejecting transitions the state machine does not allow.
    pub fn next(self, event: LifecycleEvent) -> Result<Self, Error> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        match (self, event) {
            (S::Uninitialized, E::Install) => Ok(S::Installing),
            (S::Installing, E::InstallSucceeded) => Ok(S::Installed),
            (S::Installing, E::InstallFailed) => Ok(S::InstallFailed),
            (S::Installed, E::Activate) => Ok(S::Activating),
            (S::Activating, E::ActivationFailed) => Ok(S::Installed),
            (S::Activating, E::Activated) => Ok(S::Active),
            (state, event) => Err(Error::InvalidState(format!("{event:?} is not allowed while {state}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::InstallFailed => "install_failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delete every store whose name differs from `current_version`.
///
/// Returns the names that were deleted. Deleting a store that disappeared in
/// the meantime is a no-op, so repeated calls converge on `{current_version}`.
pub async fn collect_garbage(storage: &CacheStorage, current_version: &str) -> Result<Vec<String>, Error> {
    let mut deleted = Vec::new();
    for name in storage.store_names().await? {
        if name == current_version {
            continue;
        }
        if storage.delete_store(&name).await? {
            tracing::info!(store = %name, "deleted old cache store");
            deleted.push(name);
        }
    }
    Ok(deleted)
}

/// Drives one cache version from install to active.
pub struct LifecycleManager {
    storage: CacheStorage,
    config: LifecycleConfig,
    state: LifecycleState,
    controlling: bool,
}

impl LifecycleManager {
    pub fn new(storage: CacheStorage, config: LifecycleConfig) -> Self {
        Self { storage, config, state: LifecycleState::Uninitialized, controlling: false }
    }

    /// Manager for a store an earlier activation left in control.
    ///
    /// Returns `None` when nothing was recorded as active. The manager is
    /// built directly in the `Active` state; `config.version` is replaced by
    /// the recorded store name.
    pub async fn resume(storage: CacheStorage, config: LifecycleConfig) -> Result<Option<Self>, Error> {
        let Some(version) = storage.active_store().await? else {
            return Ok(None);
        };
        tracing::info!(version = %version, "resuming previously active cache version");
        let config = LifecycleConfig { version, ..config };
        Ok(Some(Self { storage, config, state: LifecycleState::Active, controlling: true }))
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// True once control has been claimed for this version.
    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    /// Installed and configured for eager takeover.
    pub fn ready_to_take_over(&self) -> bool {
        self.state == LifecycleState::Installed && self.config.skip_waiting
    }

    fn advance(&mut self, event: LifecycleEvent) -> Result<(), Error> {
        self.state = self.state.next(event)?;
        Ok(())
    }

    /// Open the version's store and populate it with every manifest entry.
    ///
    /// All-or-nothing: any network failure or non-2xx manifest response fails
    /// the install and nothing is written.
    pub async fn initialize(&mut self, transport: &dyn Transport) -> Result<(), Error> {
        self.advance(LifecycleEvent::Install)?;
        tracing::info!(version = %self.config.version, entries = self.config.manifest.len(), "installing cache version");

        match self.populate(transport).await {
            Ok(()) => {
                self.advance(LifecycleEvent::InstallSucceeded)?;
                tracing::info!(version = %self.config.version, "cache version installed and core files cached");
                Ok(())
            }
            Err(e) => {
                self.advance(LifecycleEvent::InstallFailed)?;
                tracing::error!(version = %self.config.version, error = %e, "cache version installation failed");
                Err(e)
            }
        }
    }

    async fn populate(&self, transport: &dyn Transport) -> Result<(), Error> {
        self.storage
            .open_store(&self.config.version)
            .await
            .map_err(|e| Error::InstallFailed(format!("failed to open store {}: {e}", self.config.version)))?;

        let requests: Vec<Request> = self.config.manifest.iter().cloned().map(Request::get).collect();
        let results = join_all(requests.iter().map(|request| transport.fetch(request))).await;

        let mut snapshots = Vec::with_capacity(requests.len());
        let mut failures = Vec::new();
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(response) if response.is_ok() => snapshots.push(Snapshot::capture(request, response)),
                Ok(response) => failures.push(format!("{}: status {}", request.url, response.status)),
                Err(e) => failures.push(format!("{}: {e}", request.url)),
            }
        }

        if !failures.is_empty() {
            return Err(Error::InstallFailed(failures.join("; ")));
        }

        self.storage
            .put_all(&self.config.version, snapshots)
            .await
            .map_err(|e| Error::InstallFailed(format!("failed to store manifest: {e}")))
    }

    /// Delete every store except this version's.
    pub async fn collect_garbage(&self) -> Result<Vec<String>, Error> {
        collect_garbage(&self.storage, &self.config.version).await
    }

    /// Start intercepting requests for already-open clients. Only valid once
    /// garbage collection has finished, i.e. while activating.
    pub fn claim_control(&mut self) -> Result<(), Error> {
        if self.state != LifecycleState::Activating {
            return Err(Error::InvalidState(format!("cannot claim control while {}", self.state)));
        }
        self.controlling = true;
        tracing::debug!(version = %self.config.version, "claimed control of clients");
        Ok(())
    }

    /// Evict superseded stores, then claim control.
    pub async fn activate(&mut self) -> Result<(), Error> {
        self.advance(LifecycleEvent::Activate)?;
        tracing::info!(version = %self.config.version, "activating cache version");

        let collected = match self.collect_garbage().await {
            Ok(deleted) => {
                tracing::debug!(version = %self.config.version, deleted = deleted.len(), "garbage collection finished");
                self.storage.set_active_store(&self.config.version).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = collected {
            self.advance(LifecycleEvent::ActivationFailed)?;
            return Err(e);
        }

        self.claim_control()?;
        self.advance(LifecycleEvent::Activated)?;
        tracing::info!(version = %self.config.version, "cache version activated");
        Ok(())
    }

    /// Build the strategy executor serving requests for this version.
    pub fn executor(&self, transport: Arc<dyn Transport>, classifier: Classifier) -> Result<StrategyExecutor, Error> {
        if self.state != LifecycleState::Active {
            return Err(Error::InvalidState(format!("version {} is {}, not active", self.config.version, self.state)));
        }
        Ok(StrategyExecutor::new(self.storage.clone(), self.config.clone(), transport, classifier))
    }
}
