//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `cache_version` is empty, and
    /// `ConfigError::Invalid` if:
    /// - `origin` is not an http(s) URL or `listen_addr` is not a socket address
    /// - a manifest entry or `offline_document` is neither a `/` path nor an absolute URL
    /// - a dynamic prefix does not start with `/`
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "cache_version".into(),
                hint: "Set PRECACHE_CACHE_VERSION and bump it whenever the manifest changes".into(),
            });
        }

        self.origin_url()?;
        self.socket_addr()?;

        for entry in &self.manifest {
            if !is_resource_reference(entry) {
                return Err(invalid("manifest", format!("{entry:?} must be a /path or an absolute http(s) URL")));
            }
        }

        if !is_resource_reference(&self.offline_document) {
            return Err(invalid("offline_document", "must be a /path or an absolute http(s) URL"));
        }

        if let Some(prefix) = self.dynamic_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(invalid("dynamic_prefixes", format!("{prefix:?} must start with '/'")));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if !self.manifest.iter().any(|entry| entry == &self.offline_document) {
            tracing::warn!(
                offline_document = %self.offline_document,
                "offline_document is not part of the manifest; failed navigations will have no fallback"
            );
        }

        Ok(())
    }
}

fn is_resource_reference(entry: &str) -> bool {
    entry.starts_with('/') || entry.starts_with("http://") || entry.starts_with("https://")
}
