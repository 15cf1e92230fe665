//! Request classification.
//!
//! Every intercepted request maps to exactly one policy class:
//!
//! 1. `mode == navigate` → [`PolicyClass::Navigation`]
//! 2. URL path starts with a configured dynamic prefix → [`PolicyClass::Dynamic`]
//! 3. anything else → [`PolicyClass::Static`]

use std::fmt;

use crate::http::{Request, RequestMode};

/// Caching policy assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
    /// Document loads: network first, offline document on failure.
    Navigation,
    /// Server-rendered or data endpoints: network only, never cached.
    Dynamic,
    /// Everything else: cache first.
    Static,
}

impl PolicyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Dynamic => "dynamic",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure request classifier over a fixed set of dynamic path prefixes.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    dynamic_prefixes: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(dynamic_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { dynamic_prefixes: dynamic_prefixes.into_iter().map(Into::into).collect() }
    }

    pub fn classify(&self, request: &Request) -> PolicyClass {
        if request.mode == RequestMode::Navigate {
            return PolicyClass::Navigation;
        }
        if self.is_dynamic(request.url.path()) {
            return PolicyClass::Dynamic;
        }
        PolicyClass::Static
    }

    fn is_dynamic(&self, path: &str) -> bool {
        self.dynamic_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn dynamic_prefixes(&self) -> &[String] {
        &self.dynamic_prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn classifier() -> Classifier {
        Classifier::new(["/api/", "/db-test", "/teacher/"])
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_navigation_wins_over_dynamic_prefix() {
        let req = Request::navigate(Url::parse("http://localhost/teacher/dashboard").unwrap());
        assert_eq!(classifier().classify(&req), PolicyClass::Navigation);
    }

    #[test]
    fn test_dynamic_prefix() {
        let c = classifier();
        assert_eq!(c.classify(&get("http://localhost/api/roster")), PolicyClass::Dynamic);
        assert_eq!(c.classify(&get("http://localhost/db-test")), PolicyClass::Dynamic);
        assert_eq!(c.classify(&get("http://localhost/teacher/grades?term=2")), PolicyClass::Dynamic);
    }

    #[test]
    fn test_prefix_matches_path_start_only() {
        let c = classifier();
        assert_eq!(c.classify(&get("http://localhost/static/api/icons.svg")), PolicyClass::Static);
        assert_eq!(c.classify(&get("http://localhost/static/app.js?next=/api/")), PolicyClass::Static);
    }

    #[test]
    fn test_static_default() {
        let c = classifier();
        assert_eq!(c.classify(&get("http://localhost/static/manifest.json")), PolicyClass::Static);
        assert_eq!(c.classify(&get("http://localhost/")), PolicyClass::Static);
    }

    #[test]
    fn test_non_get_still_classified_by_path() {
        let req = get("http://localhost/api/attendance").with_method("POST");
        assert_eq!(classifier().classify(&req), PolicyClass::Dynamic);
    }

    #[test]
    fn test_empty_prefixes() {
        let c = Classifier::default();
        assert_eq!(c.classify(&get("http://localhost/api/roster")), PolicyClass::Static);
        assert!(c.dynamic_prefixes().is_empty());
    }
}
