//! Versioned cache partitions.
//!
//! A [`CacheStorage`] holds named [`Cache`] partitions. [`CacheStore`] is the
//! worker's view of it: one shell partition filled at install and one runtime
//! partition filled as responses pass through, both named by configuration.

use std::sync::Arc;

use futures::future::try_join_all;
use hashbrown::{HashMap, HashSet};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use trackside_common::now_millis;
use trackside_net::{Fetcher, Request, Response};
use url::Url;

use crate::config::CacheNames;
use crate::{CacheError, ServiceWorkerError};

// ==================== Entries ====================

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in arrival order. Repeated names appear once per
    /// value; values are kept as raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn snapshot(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(url = %self.url, header = %name, "Dropping invalid cached header"),
            }
        }

        let mut response = Response::new(status, self.body.clone());
        response.headers = headers;
        response.url = Url::parse(&self.url).ok();
        response.from_cache = true;
        response
    }
}

/// Only successful GETs over http/https are ever stored.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
    request.method == Method::GET
        && response.status == StatusCode::OK
        && matches!(request.url.scheme(), "http" | "https")
}

// ==================== Cache ====================

/// A single named partition.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries keyed by normalized request key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or replace an entry.
    pub fn put(&mut self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All partitions visible to the worker, across versions.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }
}

// ==================== Cache Store ====================

/// The worker's two partitions over shared storage.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Debug, Clone)]
pub struct CacheStore {
    storage: Arc<RwLock<CacheStorage>>,
    names: CacheNames,
    max_entry_bytes: usize,
}

impl CacheStore {
    /// Create a store over fresh storage.
    pub fn new(names: CacheNames, max_entry_bytes: usize) -> Self {
        Self::with_storage(
            Arc::new(RwLock::new(CacheStorage::new())),
            names,
            max_entry_bytes,
        )
    }

    /// Create a store over existing storage, e.g. one left by an older version.
    pub fn with_storage(
        storage: Arc<RwLock<CacheStorage>>,
        names: CacheNames,
        max_entry_bytes: usize,
    ) -> Self {
        Self {
            storage,
            names,
            max_entry_bytes,
        }
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    fn check_size(&self, key: &str, size: usize) -> Result<(), CacheError> {
        if size > self.max_entry_bytes {
            return Err(CacheError::QuotaExceeded {
                key: key.to_string(),
                size,
                limit: self.max_entry_bytes,
            });
        }
        Ok(())
    }

    /// Fetch every manifest entry and commit them to the shell partition.
    ///
    /// All or nothing: one unreachable asset or non-200 response aborts the
    /// whole operation and nothing is written.
    pub async fn precache(
        &self,
        manifest: &[Url],
        fetcher: &dyn Fetcher,
    ) -> Result<usize, ServiceWorkerError> {
        info!(cache = %self.names.shell, assets = manifest.len(), "Precaching shell");

        let fetched = try_join_all(manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = fetcher
                .fetch(request.clone())
                .await
                .map_err(|e| ServiceWorkerError::Precache(format!("{url}: {e}")))?;
            if !is_cacheable(&request, &response) {
                return Err(ServiceWorkerError::Precache(format!(
                    "{url}: bad response status {}",
                    response.status
                )));
            }
            Ok::<_, ServiceWorkerError>((request, response))
        }))
        .await?;

        let mut snapshots = Vec::with_capacity(fetched.len());
        for (request, response) in &fetched {
            let key = request.cache_key();
            self.check_size(&key, response.body().len())?;
            snapshots.push((key, CacheEntry::snapshot(request, response)));
        }

        let count = snapshots.len();
        let mut storage = self.storage.write().await;
        let shell = storage.open(&self.names.shell);
        for (key, entry) in snapshots {
            shell.put(key, entry);
        }

        info!(cache = %self.names.shell, count, "Precache complete");
        Ok(count)
    }

    /// Look a request up in the runtime partition, then the shell partition.
    ///
    /// Non-GET requests always miss.
    pub async fn lookup(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        self.lookup_key(&request.cache_key()).await
    }

    /// Look up a GET for `url`.
    pub async fn lookup_url(&self, url: &Url) -> Option<Response> {
        self.lookup(&Request::get(url.clone())).await
    }

    async fn lookup_key(&self, key: &str) -> Option<Response> {
        let storage = self.storage.read().await;
        for name in [&self.names.runtime, &self.names.shell] {
            if let Some(entry) = storage.get(name).and_then(|c| c.match_key(key)) {
                trace!(key, cache = %name, "Cache hit");
                return Some(entry.to_response());
            }
        }
        trace!(key, "Cache miss");
        None
    }

    /// Store a response in the runtime partition.
    ///
    /// Returns `Ok(false)` without writing when the pair is not cacheable.
    pub async fn store(&self, request: &Request, response: &Response) -> Result<bool, CacheError> {
        if !is_cacheable(request, response) {
            trace!(url = %request.url, status = %response.status, "Not cacheable, skipping");
            return Ok(false);
        }

        let key = request.cache_key();
        self.check_size(&key, response.body().len())?;
        let entry = CacheEntry::snapshot(request, response);

        let mut storage = self.storage.write().await;
        storage.open(&self.names.runtime).put(key, entry);
        debug!(url = %request.url, cache = %self.names.runtime, "Stored response");
        Ok(true)
    }

    /// Remove a request from both partitions.
    pub async fn delete(&self, request: &Request) -> bool {
        let key = request.cache_key();
        let mut storage = self.storage.write().await;
        let mut removed = false;
        for name in [&self.names.runtime, &self.names.shell] {
            if storage.has(name) {
                removed |= storage.open(name).delete(&key);
            }
        }
        removed
    }

    /// Keys stored in a partition.
    pub async fn keys(&self, partition: &str) -> Result<Vec<String>, CacheError> {
        let storage = self.storage.read().await;
        let cache = storage
            .get(partition)
            .ok_or_else(|| CacheError::UnknownPartition(partition.to_string()))?;
        Ok(cache.keys().into_iter().map(str::to_string).collect())
    }

    /// Names of every partition in storage.
    pub async fn partition_names(&self) -> Vec<String> {
        let storage = self.storage.read().await;
        storage.keys().into_iter().map(str::to_string).collect()
    }

    /// Delete every partition whose name is not in `current`.
    ///
    /// Returns the deleted names.
    pub async fn prune_stale_versions(&self, current: &HashSet<String>) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| !current.contains(*name))
            .map(str::to_string)
            .collect();

        for name in &stale {
            if storage.delete(name) {
                info!(cache = %name, "Deleted stale cache");
            } else {
                warn!(cache = %name, "Stale cache vanished before deletion");
            }
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{url, MockFetcher};

    fn store() -> CacheStore {
        CacheStore::new(CacheNames::for_version("v2"), 1024)
    }

    fn ok(body: &'static str) -> Response {
        Response::new(StatusCode::OK, body)
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        let request = Request::get(url("/style.css"));
        cache.put(request.cache_key(), CacheEntry::snapshot(&request, &ok("body{}")));

        assert!(cache.match_key(&request.cache_key()).is_some());
        assert!(cache.match_key("GET http://localhost:3000/other.css").is_none());
        assert!(cache.delete(&request.cache_key()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_entry_round_trips_headers() {
        let request = Request::get(url("/app.js"));
        let response = ok("x").with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/javascript"),
        );
        let restored = CacheEntry::snapshot(&request, &response).to_response();
        assert!(restored.from_cache);
        assert_eq!(restored.headers["content-type"], "text/javascript");
        assert_eq!(restored.body().as_ref(), b"x");
    }

    #[tokio::test]
    async fn test_lookup_keeps_repeated_and_opaque_headers() {
        let store = store();
        let request = Request::get(url("/fonts.css"));
        let mut response = ok("@font-face{}");
        response
            .headers
            .append(http::header::VARY, HeaderValue::from_static("accept-encoding"));
        response
            .headers
            .append(http::header::VARY, HeaderValue::from_static("origin"));
        response.headers.append(
            http::header::LINK,
            HeaderValue::from_bytes(b"</caf\xe9.woff2>; rel=preload").unwrap(),
        );
        store.store(&request, &response).await.unwrap();

        let hit = store.lookup(&request).await.unwrap();
        let vary: Vec<_> = hit.headers.get_all(http::header::VARY).iter().collect();
        assert_eq!(vary, vec!["accept-encoding", "origin"]);
        assert_eq!(
            hit.headers[http::header::LINK].as_bytes(),
            b"</caf\xe9.woff2>; rel=preload"
        );
    }

    #[test]
    fn test_is_cacheable() {
        let get = Request::get(url("/a.js"));
        assert!(is_cacheable(&get, &ok("")));
        assert!(!is_cacheable(&get, &Response::new(StatusCode::NOT_FOUND, "")));
        assert!(!is_cacheable(&get, &Response::new(StatusCode::NO_CONTENT, "")));

        let post = Request::post(url("/a.js"), None);
        assert!(!is_cacheable(&post, &ok("")));

        let ftp = Request::get(Url::parse("ftp://files.example/a.js").unwrap());
        assert!(!is_cacheable(&ftp, &ok("")));
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let store = store();
        let request = Request::get(url("/logo.png"));

        assert!(store.lookup(&request).await.is_none());
        assert!(store.store(&request, &ok("png")).await.unwrap());

        let hit = store.lookup(&request).await.unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.body().as_ref(), b"png");
        assert_eq!(store.keys("runtime-v2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_ignores_non_cacheable() {
        let store = store();
        let request = Request::get(url("/missing.png"));
        let stored = store
            .store(&request, &Response::new(StatusCode::NOT_FOUND, ""))
            .await
            .unwrap();
        assert!(!stored);
        assert!(store.partition_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let store = store();
        let request = Request::get(url("/data.json"));
        store.store(&request, &ok("{}")).await.unwrap();
        let before = store.keys("runtime-v2").await.unwrap();
        store.store(&request, &ok("{}")).await.unwrap();
        let after = store.keys("runtime-v2").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(store.lookup(&request).await.unwrap().body().as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_store_rejects_oversized_body() {
        let store = CacheStore::new(CacheNames::default(), 4);
        let request = Request::get(url("/big.bin"));
        let err = store.store(&request, &ok("too large")).await.unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { limit: 4, .. }));
        assert!(store.lookup(&request).await.is_none());
    }

    #[tokio::test]
    async fn test_non_get_lookup_misses() {
        let store = store();
        let get = Request::get(url("/x"));
        store.store(&get, &ok("x")).await.unwrap();

        let mut head = get.clone();
        head.method = Method::HEAD;
        assert!(store.lookup(&head).await.is_none());
    }

    #[tokio::test]
    async fn test_runtime_shadows_shell() {
        let store = store();
        let fetcher = MockFetcher::new().respond("/", ok("shell"));
        store.precache(&[url("/")], &fetcher).await.unwrap();

        let request = Request::get(url("/"));
        store.store(&request, &ok("fresh")).await.unwrap();
        assert_eq!(store.lookup(&request).await.unwrap().body().as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_partitions() {
        let store = store();
        let fetcher = MockFetcher::new().respond("/", ok("shell"));
        store.precache(&[url("/")], &fetcher).await.unwrap();
        let request = Request::get(url("/"));
        store.store(&request, &ok("fresh")).await.unwrap();

        assert!(store.delete(&request).await);
        assert!(store.lookup(&request).await.is_none());
        assert!(!store.delete(&request).await);
    }

    #[tokio::test]
    async fn test_precache_all_or_nothing() {
        let store = store();
        let fetcher = MockFetcher::new()
            .respond("/", ok("index"))
            .respond("/offline.html", ok("offline"));

        let manifest = [url("/"), url("/offline.html"), url("/missing.css")];
        let err = store.precache(&manifest, &fetcher).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Precache(_)));
        assert!(store.lookup_url(&url("/")).await.is_none());
        assert!(store.partition_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_precache_rejects_error_status() {
        let store = store();
        let fetcher = MockFetcher::new()
            .respond("/", ok("index"))
            .respond("/gone.css", Response::new(StatusCode::NOT_FOUND, ""));

        let result = store.precache(&[url("/"), url("/gone.css")], &fetcher).await;
        assert!(result.is_err());
        assert!(store.lookup_url(&url("/")).await.is_none());
    }

    #[tokio::test]
    async fn test_precache_success() {
        let store = store();
        let fetcher = MockFetcher::new()
            .respond("/", ok("index"))
            .respond("/offline.html", ok("offline"));

        let count = store
            .precache(&[url("/"), url("/offline.html")], &fetcher)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.keys("shell-v2").await.unwrap().len(), 2);
        assert!(matches!(
            store.keys("runtime-v2").await,
            Err(CacheError::UnknownPartition(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_stale_versions() {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        {
            let mut s = storage.write().await;
            for name in ["shell-v1", "runtime-v1", "shell-v2", "runtime-v2"] {
                s.open(name);
            }
        }

        let store = CacheStore::with_storage(storage, CacheNames::for_version("v2"), 1024);
        let mut deleted = store.prune_stale_versions(&store.names().current()).await;
        deleted.sort();
        assert_eq!(deleted, vec!["runtime-v1".to_string(), "shell-v1".to_string()]);

        let mut remaining = store.partition_names().await;
        remaining.sort();
        assert_eq!(remaining, vec!["runtime-v2".to_string(), "shell-v2".to_string()]);
    }
}
