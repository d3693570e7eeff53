//! Request classification.
//!
//! Decides, per outbound request, whether the worker intercepts it and which
//! caching strategy serves it.

use http::Method;
use tracing::trace;
use trackside_net::Request;
use url::Url;

use crate::config::WorkerConfig;

/// URL pattern for matching.
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
    /// Full URL contains the substring (query string included).
    Contains,
    /// Path equals the pattern or is a sub-path of it. `/` only matches
    /// itself.
    Route,
}

impl UrlPattern {
    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Create an app route pattern.
    pub fn route(path: &str) -> Self {
        Self {
            pattern_type: PatternType::Route,
            pattern: path.trim_end_matches('/').to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self.pattern_type {
            PatternType::Contains => url.as_str().contains(&self.pattern),
            PatternType::Route => {
                let path = url.path();
                if self.pattern.is_empty() {
                    return path == "/";
                }
                path == self.pattern
                    || path
                        .strip_prefix(self.pattern.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Not http(s) or not GET; left to the platform untouched.
    Ignore,
    /// Backend call; straight to the network, never cached.
    Bypass,
    /// Navigation or known app route; network-first.
    AppRoute,
    /// Everything else; cache-first.
    StaticAsset,
}

impl RouteClass {
    /// Whether the worker supplies the response itself.
    pub fn is_intercepted(self) -> bool {
        matches!(self, RouteClass::AppRoute | RouteClass::StaticAsset)
    }
}

/// Ordered classification rules.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    bypass: Vec<UrlPattern>,
    app_routes: Vec<UrlPattern>,
}

impl RouteClassifier {
    pub fn new(bypass: Vec<UrlPattern>, app_routes: Vec<UrlPattern>) -> Self {
        Self { bypass, app_routes }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.bypass_patterns.iter().map(|p| UrlPattern::contains(p)).collect(),
            config.app_routes.iter().map(|p| UrlPattern::route(p)).collect(),
        )
    }

    /// Classify a request.
    ///
    /// Bypass is checked before app routes so backend calls on the app's own
    /// origin are never cached.
    pub fn classify(&self, request: &Request) -> RouteClass {
        let class = self.classify_parts(&request.url, &request.method, request.is_navigation());
        trace!(url = %request.url, class = ?class, "Classified request");
        class
    }

    pub fn classify_parts(&self, url: &Url, method: &Method, is_navigation: bool) -> RouteClass {
        if !matches!(url.scheme(), "http" | "https") {
            return RouteClass::Ignore;
        }
        if *method != Method::GET {
            return RouteClass::Ignore;
        }
        if self.bypass.iter().any(|p| p.matches(url)) {
            return RouteClass::Bypass;
        }
        if is_navigation || self.app_routes.iter().any(|p| p.matches(url)) {
            return RouteClass::AppRoute;
        }
        RouteClass::StaticAsset
    }
}
