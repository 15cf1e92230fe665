//! Structured errors for the precache proxy surface.
//!
//! Core errors map onto HTTP statuses here; the strategies have already
//! turned every recoverable failure into a response, so anything reaching
//! this layer is reported to the client as-is.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use precache_client::UrlError;

/// Errors surfaced by the proxy handlers.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The incoming request could not be mapped onto the origin.
    #[error("BAD_REQUEST: {0}")]
    BadRequest(String),

    /// A response could not be relayed to the client.
    #[error("BAD_GATEWAY: {0}")]
    Upstream(String),

    #[error(transparent)]
    Core(#[from] precache_core::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Core(e) if e.is_network() => StatusCode::BAD_GATEWAY,
            ProxyError::Core(precache_core::Error::WorkerClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Core(precache_core::Error::InvalidState(_)) => StatusCode::CONFLICT,
            ProxyError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UrlError> for ProxyError {
    fn from(err: UrlError) -> Self {
        ProxyError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = status.as_u16(), error = %self, "proxy request failed");
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precache_core::{Error, NetworkFailure};

    #[test]
    fn test_network_failure_is_bad_gateway() {
        let err = ProxyError::from(Error::from(NetworkFailure::new("connection refused")));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "NETWORK_FAILURE: connection refused");
    }

    #[test]
    fn test_bad_target_is_bad_request() {
        let err = ProxyError::from(UrlError::NotOriginRelative("//evil.example/".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_closed_worker_is_unavailable() {
        assert_eq!(ProxyError::from(Error::WorkerClosed).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ProxyError::from(Error::Store("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_state_is_conflict() {
        let err = ProxyError::from(Error::InvalidState("no installed version is waiting to activate".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
