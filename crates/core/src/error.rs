//! Unified error types for precache.
//!
//! Every variant displays with a stable code prefix so log lines and proxy
//! error bodies can be grepped by failure class.

use tokio_rusqlite::rusqlite;

/// Transport-level failure: no response could be obtained at all.
///
/// A response with a non-2xx status is *not* a network failure; it travels
/// back to the caller as an ordinary [`Response`](crate::http::Response).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct NetworkFailure {
    pub reason: String,
}

impl NetworkFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Unified error types for the precache proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more manifest entries could not be fetched during install.
    #[error("INSTALL_FAILED: {0}")]
    InstallFailed(String),

    /// The network transport produced no response.
    #[error("NETWORK_FAILURE: {0}")]
    Network(#[from] NetworkFailure),

    /// A cache store operation was rejected.
    #[error("STORE_ERROR: {0}")]
    Store(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// A lifecycle transition was requested from a state that does not allow it.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    /// The worker event queue has shut down.
    #[error("WORKER_CLOSED")]
    WorkerClosed,
}

impl Error {
    /// True when the failure came from the network transport.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
