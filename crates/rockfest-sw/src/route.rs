//! Request classification.

use rockfest_net::Request;
use tracing::trace;

use crate::config::WorkerConfig;

/// URL path pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact path match.
    Exact,
    /// Path prefix.
    Prefix,
    /// Path suffix (e.g. a file extension).
    Suffix,
    /// Path contains substring.
    Contains,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(path: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: path.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::Suffix,
            pattern: suffix.to_string(),
        }
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Check if a URL path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self.pattern_type {
            PatternType::Exact => path == self.pattern,
            PatternType::Prefix => path.starts_with(&self.pattern),
            PatternType::Suffix => path.ends_with(&self.pattern),
            PatternType::Contains => path.contains(&self.pattern),
        }
    }
}

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Straight to the network, no cache involvement.
    Bypass,
    /// Static bucket first, network on a miss.
    CacheFirst,
    /// Network first, cache then offline JSON on failure.
    NetworkFirst,
    /// Cached copy now, refreshed in the background.
    StaleWhileRevalidate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Bypass => "bypass",
            Route::CacheFirst => "cache-first",
            Route::NetworkFirst => "network-first",
            Route::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

/// Picks a [`Route`] for each request. First match wins:
/// bypass, cache-first, network-first, stale-while-revalidate.
#[derive(Debug, Clone, Default)]
pub struct Router {
    static_patterns: Vec<UrlPattern>,
    api_patterns: Vec<UrlPattern>,
}

impl Router {
    pub fn new(static_patterns: Vec<UrlPattern>, api_patterns: Vec<UrlPattern>) -> Self {
        Self {
            static_patterns,
            api_patterns,
        }
    }

    /// Suffix patterns from `static_suffixes`, substring patterns from `api_patterns`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.static_suffixes.iter().map(|s| UrlPattern::suffix(s)).collect(),
            config.api_patterns.iter().map(|s| UrlPattern::contains(s)).collect(),
        )
    }

    pub fn classify(&self, request: &Request) -> Route {
        let path = request.url.path();

        let route = if request.has_range() || request.destination.is_media() {
            Route::Bypass
        } else if self.static_patterns.iter().any(|p| p.matches(path)) {
            Route::CacheFirst
        } else if self.api_patterns.iter().any(|p| p.matches(path)) {
            Route::NetworkFirst
        } else {
            Route::StaleWhileRevalidate
        };

        trace!(url = %request.url, route = route.as_str(), "Classified request");
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{header, HeaderValue};
    use rockfest_net::RequestDestination;
    use url::Url;

    fn request(path: &str) -> Request {
        Request::get(Url::parse("https://rockfest.example/").unwrap().join(path).unwrap())
    }

    fn router() -> Router {
        Router::from_config(&WorkerConfig::default())
    }

    #[test]
    fn test_url_pattern_exact() {
        let pattern = UrlPattern::exact("/");
        assert!(pattern.matches("/"));
        assert!(!pattern.matches("/lineup"));
    }

    #[test]
    fn test_url_pattern_prefix() {
        assert!(UrlPattern::prefix("/api/").matches("/api/bands"));
        assert!(!UrlPattern::prefix("/api/").matches("/gallery/api/"));
    }

    #[test]
    fn test_url_pattern_suffix() {
        assert!(UrlPattern::suffix(".css").matches("/assets/main.css"));
        assert!(!UrlPattern::suffix(".css").matches("/assets/main.css.map"));
    }

    #[test]
    fn test_url_pattern_contains() {
        assert!(UrlPattern::contains("/api/bands").matches("/v2/api/bands/42"));
    }

    #[test]
    fn test_range_header_bypasses() {
        let ranged = request("/assets/hero.png")
            .header(header::RANGE, HeaderValue::from_static("bytes=0-1023"));
        assert_eq!(router().classify(&ranged), Route::Bypass);
    }

    #[test]
    fn test_media_destination_bypasses() {
        let video = request("/media/aftermovie.mp4").destination(RequestDestination::Video);
        let audio = request("/api/bands/1/preview").destination(RequestDestination::Audio);
        assert_eq!(router().classify(&video), Route::Bypass);
        assert_eq!(router().classify(&audio), Route::Bypass);
    }

    #[test]
    fn test_static_suffix_is_cache_first() {
        let router = router();
        assert_eq!(router.classify(&request("/assets/app.js")), Route::CacheFirst);
        assert_eq!(router.classify(&request("/manifest.json")), Route::CacheFirst);
        assert_eq!(router.classify(&request("/lineup/")), Route::CacheFirst);
    }

    #[test]
    fn test_api_is_network_first() {
        let router = router();
        assert_eq!(router.classify(&request("/api/bands")), Route::NetworkFirst);
        assert_eq!(router.classify(&request("/api/schedule?day=2")), Route::NetworkFirst);
    }

    #[test]
    fn test_everything_else_is_stale_while_revalidate() {
        let router = router();
        assert_eq!(router.classify(&request("/lineup")), Route::StaleWhileRevalidate);
        assert_eq!(router.classify(&request("/api/quiz")), Route::StaleWhileRevalidate);
    }

    #[test]
    fn test_static_wins_over_api() {
        let router = Router::new(
            vec![UrlPattern::suffix(".json")],
            vec![UrlPattern::contains("/api/")],
        );
        assert_eq!(router.classify(&request("/api/bands.json")), Route::CacheFirst);
    }
}
