//! HTTP transport behind the [`Fetcher`] seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use url::{Origin, Url};

use crate::{NetError, Request, Response, ResponseType};

/// Something that can put a request on the wire.
///
/// The worker never talks to `reqwest` directly; hosts and tests plug in their
/// own implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. HTTP error statuses are `Ok`; only transport
    /// failures are `Err`.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
    /// Origin of the application; responses from it are `basic`, everything
    /// else is `cors`. `None` treats every response as `basic`.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Trackside/{}", env!("CARGO_PKG_VERSION")),
            timeout_ms: 30_000,
            max_redirects: 10,
            cookies_enabled: true,
            origin: None,
        }
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `reqwest`-backed [`Fetcher`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
    origin: Option<Origin>,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let origin = config.origin.as_ref().map(Url::origin);
        info!(origin = ?config.origin, "ResourceLoader initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    fn classify(&self, url: &Url) -> ResponseType {
        match self.origin {
            Some(ref origin) if url.origin() != *origin => ResponseType::Cors,
            _ => ResponseType::Basic,
        }
    }

    fn map_error(&self, request: &Request, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(request.timeout.unwrap_or_else(|| self.config.timeout()))
        } else if error.is_connect() {
            NetError::Offline(error.to_string())
        } else {
            NetError::HttpError(error)
        }
    }

    async fn execute(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.map_error(&request, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&request, e))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        let mut out = Response::new(status, body)
            .with_type(self.classify(&url))
            .with_url(url);
        out.headers = headers;
        Ok(out)
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.execute(request).await
    }
}
