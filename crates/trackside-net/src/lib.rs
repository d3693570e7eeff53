//! # Trackside Net
//!
//! Request/response model and HTTP transport for the Trackside offline worker.
//!
//! ## Design Goals
//!
//! 1. **Host-neutral model**: requests and responses are plain values that can
//!    be cloned, cached and synthesized without a live connection
//! 2. **Transport seam**: the worker only sees the [`Fetcher`] trait, so tests
//!    and hosts can supply their own network
//! 3. **Async HTTP**: [`ResourceLoader`] implements [`Fetcher`] on `reqwest`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{Fetcher, LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Body decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as reported by the page that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level browser navigation.
    Navigate,
    /// Same-origin subresource.
    #[default]
    SameOrigin,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    fn with_method(url: Url, method: Method) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::SameOrigin,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::with_method(url, Method::GET)
    }

    /// Create a navigation GET request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Option<Bytes>) -> Self {
        let mut request = Self::with_method(url, Method::POST);
        request.body = body;
        request
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Normalized cache key: method plus URL without fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

/// Response type, mirroring the Fetch standard's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response with CORS.
    Cors,
    /// Produced locally rather than by the network.
    Synthetic,
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Whether this response was served from a cache partition.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Create a basic response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            from_cache: false,
            body: body.into(),
        }
    }

    /// Create a locally generated `text/plain` response.
    pub fn synthetic_text(status: StatusCode, text: &str) -> Self {
        let mut response = Self::new(status, Bytes::copy_from_slice(text.as_bytes()));
        response.response_type = ResponseType::Synthetic;
        if let Ok(value) = HeaderValue::from_str(mime::TEXT_PLAIN_UTF_8.as_ref()) {
            response.headers.insert(CONTENT_TYPE, value);
        }
        response
    }

    /// Set the response URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type`, if any.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::navigate(Url::parse("https://app.test/ranking?page=2#top").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.cache_key(), "GET https://app.test/ranking?page=2");
    }

    #[test]
    fn test_synthetic_text_response() {
        let response = Response::synthetic_text(StatusCode::REQUEST_TIMEOUT, "Network error");
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.response_type, ResponseType::Synthetic);
        assert_eq!(response.content_type().unwrap().essence_str(), "text/plain");
        assert_eq!(response.text().unwrap(), "Network error");
        assert!(!response.ok());
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Count {
            count: u64,
        }

        let response = Response::new(StatusCode::OK, r#"{"count": 5}"#);
        assert_eq!(response.json::<Count>().unwrap().count, 5);
        assert!(response.json::<Vec<u8>>().is_err());
    }
}
