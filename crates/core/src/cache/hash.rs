//! Request identity keys.

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Method;

/// Compute the cache key for a request: SHA-256 over method and URL.
pub fn request_key(method: &Method, url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
