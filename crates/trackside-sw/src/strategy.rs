//! Network-first and cache-first response strategies.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, warn};
use trackside_common::LogErrorExt;
use trackside_net::{Fetcher, Request, Response, ResponseType};
use url::Url;

use crate::cache::CacheStore;
use crate::config::CacheWriteMode;
use crate::route::RouteClass;

const OFFLINE_TEXT: &str = "Offline";
const NETWORK_ERROR_TEXT: &str = "Network error";

/// Serves intercepted requests from the network and the cache store.
pub struct FetchStrategyEngine {
    cache: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    offline_page: Url,
    write_mode: CacheWriteMode,
}

impl FetchStrategyEngine {
    pub fn new(
        cache: CacheStore,
        fetcher: Arc<dyn Fetcher>,
        offline_page: Url,
        write_mode: CacheWriteMode,
    ) -> Self {
        Self {
            cache,
            fetcher,
            offline_page,
            write_mode,
        }
    }

    /// Serve a classified request. `None` for classes the worker does not
    /// intercept.
    pub async fn handle(&self, class: RouteClass, request: Request) -> Option<Response> {
        match class {
            RouteClass::AppRoute => Some(self.network_first(request).await),
            RouteClass::StaticAsset => Some(self.cache_first(request).await),
            RouteClass::Ignore | RouteClass::Bypass => None,
        }
    }

    /// Network, then cache, then the offline page (navigations) or a 408.
    pub async fn network_first(&self, request: Request) -> Response {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status != StatusCode::OK {
                    debug!(
                        url = %request.url,
                        status = %response.status,
                        "Passing through uncacheable response"
                    );
                    return response;
                }
                self.remember(request, response.clone()).await;
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed, falling back to cache");
                if let Some(cached) = self.cache.lookup(&request).await {
                    return cached;
                }
                if request.is_navigation() {
                    return self.offline_fallback().await;
                }
                Response::synthetic_text(StatusCode::REQUEST_TIMEOUT, NETWORK_ERROR_TEXT)
            }
        }
    }

    /// Cache, then network; a 408 when both miss.
    pub async fn cache_first(&self, request: Request) -> Response {
        if let Some(cached) = self.cache.lookup(&request).await {
            return cached;
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status != StatusCode::OK
                    || response.response_type != ResponseType::Basic
                {
                    debug!(
                        url = %request.url,
                        status = %response.status,
                        response_type = ?response.response_type,
                        "Passing through uncacheable response"
                    );
                    return response;
                }
                self.remember(request, response.clone()).await;
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed for static asset");
                Response::synthetic_text(StatusCode::REQUEST_TIMEOUT, NETWORK_ERROR_TEXT)
            }
        }
    }

    async fn offline_fallback(&self) -> Response {
        match self.cache.lookup_url(&self.offline_page).await {
            Some(page) => page,
            None => {
                warn!(page = %self.offline_page, "Offline page not cached");
                Response::synthetic_text(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_TEXT)
            }
        }
    }

    /// Best-effort runtime cache write. Failures are logged and never reach
    /// the caller.
    async fn remember(&self, request: Request, response: Response) {
        match self.write_mode {
            CacheWriteMode::Detached => {
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    cache
                        .store(&request, &response)
                        .await
                        .log_warn("Runtime cache write failed");
                });
            }
            CacheWriteMode::Inline => {
                self.cache
                    .store(&request, &response)
                    .await
                    .log_warn("Runtime cache write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheNames;
    use crate::test_support::{url, MockFetcher};

    fn engine_with(
        fetcher: Arc<MockFetcher>,
        mode: CacheWriteMode,
        limit: usize,
    ) -> (FetchStrategyEngine, CacheStore) {
        let cache = CacheStore::new(CacheNames::default(), limit);
        let engine = FetchStrategyEngine::new(cache.clone(), fetcher, url("/offline.html"), mode);
        (engine, cache)
    }

    fn engine(fetcher: Arc<MockFetcher>) -> (FetchStrategyEngine, CacheStore) {
        engine_with(fetcher, CacheWriteMode::Inline, 1024)
    }

    fn ok(body: &'static str) -> Response {
        Response::new(StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_network_first_stores_and_returns() {
        let fetcher = Arc::new(MockFetcher::new().respond("/metas", ok("goals v1")));
        let (engine, cache) = engine(fetcher.clone());

        let response = engine.network_first(Request::get(url("/metas"))).await;
        assert_eq!(response.body().as_ref(), b"goals v1");
        assert!(!response.from_cache);
        assert!(cache.lookup_url(&url("/metas")).await.is_some());
    }

    #[tokio::test]
    async fn test_network_first_passes_errors_through_uncached() {
        let fetcher = Arc::new(MockFetcher::new().respond(
            "/ranking",
            Response::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        ));
        let (engine, cache) = engine(fetcher);

        let response = engine.network_first(Request::get(url("/ranking"))).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(cache.lookup_url(&url("/ranking")).await.is_none());
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_latest_cached() {
        let fetcher = Arc::new(MockFetcher::new().respond("/treinos", ok("first")));
        let (engine, _cache) = engine(fetcher.clone());

        engine.network_first(Request::get(url("/treinos"))).await;
        fetcher.set("/treinos", ok("second"));
        engine.network_first(Request::get(url("/treinos"))).await;

        fetcher.set_offline(true);
        let response = engine.network_first(Request::get(url("/treinos"))).await;
        assert!(response.from_cache);
        assert_eq!(response.body().as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_navigation_miss_serves_offline_page() {
        let fetcher = Arc::new(MockFetcher::new().respond("/offline.html", ok("<h1>offline</h1>")));
        let (engine, cache) = engine(fetcher.clone());
        cache.precache(&[url("/offline.html")], fetcher.as_ref()).await.unwrap();

        fetcher.set_offline(true);
        let response = engine.network_first(Request::navigate(url("/atletas/7"))).await;
        assert_eq!(response.body().as_ref(), b"<h1>offline</h1>");
    }

    #[tokio::test]
    async fn test_navigation_miss_without_offline_page_is_synthetic() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_offline(true);
        let (engine, _cache) = engine(fetcher);

        let response = engine.network_first(Request::navigate(url("/metas"))).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.response_type, ResponseType::Synthetic);
        assert_eq!(response.text().unwrap(), "Offline");
    }

    #[tokio::test]
    async fn test_non_navigation_miss_is_408() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_offline(true);
        let (engine, _cache) = engine(fetcher);

        let response = engine.network_first(Request::get(url("/metas"))).await;
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let fetcher = Arc::new(MockFetcher::new().respond("/app.css", ok("body{}")));
        let (engine, _cache) = engine(fetcher.clone());

        engine.cache_first(Request::get(url("/app.css"))).await;
        assert_eq!(fetcher.calls(), 1);

        let response = engine.cache_first(Request::get(url("/app.css"))).await;
        assert!(response.from_cache);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_hit_from_precache() {
        let fetcher = Arc::new(MockFetcher::new().respond("/icons/icon-192.png", ok("png")));
        let (engine, cache) = engine(fetcher.clone());
        cache.precache(&[url("/icons/icon-192.png")], fetcher.as_ref()).await.unwrap();
        let before = fetcher.calls();

        let response = engine.cache_first(Request::get(url("/icons/icon-192.png"))).await;
        assert!(response.from_cache);
        assert_eq!(fetcher.calls(), before);
    }

    #[tokio::test]
    async fn test_cache_first_never_stores_cross_origin() {
        let fetcher = Arc::new(
            MockFetcher::new().respond("/font.woff2", ok("font").with_type(ResponseType::Cors)),
        );
        let (engine, cache) = engine(fetcher);

        let response = engine.cache_first(Request::get(url("/font.woff2"))).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(cache.lookup_url(&url("/font.woff2")).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_first_offline_is_408() {
        let fetcher = Arc::new(MockFetcher::new());
        let (engine, _cache) = engine(fetcher);

        let response = engine.cache_first(Request::get(url("/chunk.js"))).await;
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.text().unwrap(), "Network error");
    }

    #[tokio::test]
    async fn test_store_failure_does_not_affect_response() {
        let fetcher = Arc::new(MockFetcher::new().respond("/video.mp4", ok("way too large")));
        let (engine, cache) = engine_with(fetcher, CacheWriteMode::Inline, 4);

        let response = engine.cache_first(Request::get(url("/video.mp4"))).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"way too large");
        assert!(cache.lookup_url(&url("/video.mp4")).await.is_none());
    }

    #[tokio::test]
    async fn test_detached_write_lands_after_yield() {
        let fetcher = Arc::new(MockFetcher::new().respond("/main.js", ok("js")));
        let (engine, cache) = engine_with(fetcher, CacheWriteMode::Detached, 1024);

        engine.cache_first(Request::get(url("/main.js"))).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(cache.lookup_url(&url("/main.js")).await.is_some());
    }

    #[tokio::test]
    async fn test_bypass_and_ignore_are_not_handled() {
        let fetcher = Arc::new(MockFetcher::new().respond("/rest/v1/atletas", ok("[]")));
        let (engine, cache) = engine(fetcher.clone());

        assert!(engine
            .handle(RouteClass::Bypass, Request::get(url("/rest/v1/atletas")))
            .await
            .is_none());
        assert!(engine.handle(RouteClass::Ignore, Request::post(url("/x"), None)).await.is_none());
        assert_eq!(fetcher.calls(), 0);
        assert!(cache.partition_names().await.is_empty());
    }
}
