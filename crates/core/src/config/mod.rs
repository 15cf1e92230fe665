//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PRECACHE_*)
//! 2. TOML config file (if PRECACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The cache version must change whenever the manifest or the policy table
//! changes; that is what evicts stale stores on the next activation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::Classifier;
use crate::http::DEFAULT_OFFLINE_MESSAGE;
use crate::lifecycle::{LifecycleConfig, Manifest};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PRECACHE_*)
/// 2. TOML config file (if PRECACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name of the current cache store.
    ///
    /// Set via PRECACHE_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Resources fetched and stored at install time, in order.
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Document served to failed navigations.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,

    /// Path prefixes routed to the network-only policy.
    #[serde(default = "default_dynamic_prefixes")]
    pub dynamic_prefixes: Vec<String>,

    /// Message placed in the synthesised 503 body for dynamic endpoints.
    #[serde(default = "default_offline_message")]
    pub offline_message: String,

    /// When set, a failed navigation first tries its own stored snapshot.
    #[serde(default)]
    pub navigation_cache_fallback: bool,

    /// Take over as soon as install succeeds instead of waiting for an
    /// explicit activate event.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Origin server the proxy sits in front of.
    ///
    /// Set via PRECACHE_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Address the proxy listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to SQLite cache database.
    ///
    /// Set via PRECACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for upstream requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes accepted per upstream response.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_cache_version() -> String {
    "precache-v1".into()
}

fn default_manifest() -> Vec<String> {
    vec![
        "/static/manifest.json".into(),
        "/static/images/school_192.png".into(),
        "/static/offline.html".into(),
    ]
}

fn default_offline_document() -> String {
    "/static/offline.html".into()
}

fn default_dynamic_prefixes() -> Vec<String> {
    ["/api/", "/db-test", "/teacher/", "/secretary/", "/headteacher/", "/admin/", "/bursar/", "/parent/"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_offline_message() -> String {
    DEFAULT_OFFLINE_MESSAGE.into()
}

fn default_origin() -> String {
    "http://127.0.0.1:5000".into()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./precache-cache.sqlite")
}

fn default_user_agent() -> String {
    "precache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            manifest: default_manifest(),
            offline_document: default_offline_document(),
            dynamic_prefixes: default_dynamic_prefixes(),
            offline_message: default_offline_message(),
            navigation_cache_fallback: false,
            skip_waiting: true,
            origin: default_origin(),
            listen_addr: default_listen_addr(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PRECACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment.merge(
            Env::prefixed("PRECACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        ))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => {
                Err(ConfigError::Invalid { field: "origin".into(), reason: format!("unsupported scheme {scheme}") })
            }
        }
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            field: "listen_addr".into(),
            reason: e.to_string(),
        })
    }

    /// Version, manifest and fallback settings handed to the lifecycle and
    /// strategy layers.
    pub fn lifecycle_config(&self) -> Result<LifecycleConfig, ConfigError> {
        let origin = self.origin_url()?;
        let manifest = Manifest::resolve(&origin, &self.manifest)
            .map_err(|e| ConfigError::Invalid { field: "manifest".into(), reason: e.to_string() })?;
        let offline_document = origin
            .join(&self.offline_document)
            .map_err(|e| ConfigError::Invalid { field: "offline_document".into(), reason: e.to_string() })?;

        Ok(LifecycleConfig {
            version: self.cache_version.clone(),
            manifest,
            offline_document,
            offline_message: self.offline_message.clone(),
            navigation_cache_fallback: self.navigation_cache_fallback,
            skip_waiting: self.skip_waiting,
        })
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.dynamic_prefixes.iter().cloned())
    }
}
