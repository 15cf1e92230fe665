//! URL canonicalization and upstream resolution.

use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request target must be an origin-relative path: {0}")]
    NotOriginRelative(String),
}

/// Canonicalize an origin string.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to http:// if missing
/// 3. Lowercase the host
/// 4. Drop path, query and fragment
pub fn canonicalize_origin(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("http://{trimmed}") };

    let mut parsed = Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(host.as_str()))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_path("/");
    parsed.set_query(None);
    parsed.set_fragment(None);

    Ok(parsed)
}

/// Resolve an incoming request target (`/path?query`) against the origin.
///
/// Scheme-relative targets (`//host/...`) are rejected so a request can never
/// be steered to a different host.
pub fn resolve_upstream(origin: &Url, path_and_query: &str) -> Result<Url, UrlError> {
    if !path_and_query.starts_with('/') || path_and_query.starts_with("//") {
        return Err(UrlError::NotOriginRelative(path_and_query.to_string()));
    }

    let mut url = origin
        .join(path_and_query)
        .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    url.set_fragment(None);

    if !same_origin(origin, &url) {
        return Err(UrlError::NotOriginRelative(path_and_query.to_string()));
    }

    Ok(url)
}

/// Scheme, host and effective port all match.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}
