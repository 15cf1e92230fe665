//! precache proxy entry point.
//!
//! Boots the offline-first caching proxy in front of the configured origin.
//! Logging goes to stderr as JSON lines; `RUST_LOG` controls verbosity.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use precache_client::{FetchConfig, HttpTransport, canonicalize_origin};
use precache_core::{AppConfig, CacheStorage, LifecycleState, Worker};

mod admin;
mod error;
mod proxy;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let origin = canonicalize_origin(&config.origin)?;
    let lifecycle = config.lifecycle_config()?;

    let storage = CacheStorage::open(&config.db_path).await?;
    let transport = HttpTransport::new(FetchConfig {
        origin: origin.clone(),
        user_agent: config.user_agent.clone(),
        max_bytes: config.max_bytes,
        timeout: config.timeout(),
        ..FetchConfig::new(origin.clone())
    })?;

    let worker = Worker::spawn(storage.clone(), Arc::new(transport), lifecycle, config.classifier());

    match worker.install().await {
        Ok(state) => tracing::info!(version = %config.cache_version, state = %state, "cache installed"),
        Err(e) => match worker.active_version().await {
            Some(active) => tracing::error!(
                version = %config.cache_version,
                active = %active,
                error = %e,
                "install failed, previous cache version stays in control"
            ),
            None => tracing::error!(
                version = %config.cache_version,
                error = %e,
                "install failed, requests pass through to the origin"
            ),
        },
    }
    if worker.state() == LifecycleState::Installed {
        tracing::info!(
            version = %config.cache_version,
            "installed version is waiting, POST {} to take over",
            proxy::ACTIVATE_PATH
        );
    }

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, origin = %origin, "Starting precache proxy");

    let app = proxy::router(proxy::ProxyState::new(worker.clone(), storage, origin, config.max_bytes));
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.flush().await;
    tracing::info!("precache proxy stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
