//! Worker configuration.
//!
//! Everything that identifies a deployed version of the worker (cache names,
//! precache manifest, known routes, sync endpoints) lives here and is passed
//! in once at startup.

use std::path::Path;
use std::time::Duration;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trackside_net::LoaderConfig;
use url::Url;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Names of the two cache partitions owned by one worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNames {
    /// Precache partition, filled at install.
    pub shell: String,
    /// Runtime partition, filled as responses pass through.
    pub runtime: String,
}

impl CacheNames {
    /// `shell-<version>` / `runtime-<version>`.
    pub fn for_version(version: &str) -> Self {
        Self {
            shell: format!("shell-{version}"),
            runtime: format!("runtime-{version}"),
        }
    }

    /// The set of names that survive activation.
    pub fn current(&self) -> HashSet<String> {
        [self.shell.clone(), self.runtime.clone()].into_iter().collect()
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self::for_version("v2")
    }
}

/// How runtime cache writes are issued from a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheWriteMode {
    /// Spawned and not awaited; the response is returned immediately.
    #[default]
    Detached,
    /// Awaited before the response is returned.
    Inline,
}

/// One background sync tag and the endpoint it flushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTaskConfig {
    /// Tag registered by the page.
    pub tag: String,
    /// Path POSTed to when the tag fires.
    pub endpoint: String,
    /// Plural noun used in the success notification ("attendance records").
    pub label: String,
}

/// In-app destinations for each notification category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryPaths {
    pub training: String,
    pub goals: String,
    pub ranking: String,
    pub attendance: String,
}

impl Default for CategoryPaths {
    fn default() -> Self {
        Self {
            training: "/treino-do-dia".to_string(),
            goals: "/metas".to_string(),
            ranking: "/ranking".to_string(),
            attendance: "/presencas".to_string(),
        }
    }
}

/// Notification defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Default title; also used when a push body is not JSON.
    pub app_name: String,
    pub icon: String,
    pub badge: String,
    /// Body used when a payload carries none.
    pub default_body: String,
    /// Body of the last-resort notification shown when display fails.
    pub fallback_body: String,
    /// Delay before a "later" reminder fires.
    pub reminder_delay_secs: u64,
    pub paths: CategoryPaths,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_name: "Trackside".to_string(),
            icon: "/icons/icon-192.png".to_string(),
            badge: "/icons/badge-72.png".to_string(),
            default_body: "You have a new notification".to_string(),
            fallback_body: "A new update is available".to_string(),
            reminder_delay_secs: 60 * 60,
            paths: CategoryPaths::default(),
        }
    }
}

impl NotificationConfig {
    pub fn reminder_delay(&self) -> Duration {
        Duration::from_secs(self.reminder_delay_secs)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered for; relative paths resolve against it.
    pub origin: Url,
    /// Cache partition names for this version.
    pub caches: CacheNames,
    /// Shell assets fetched at install, all or nothing.
    pub precache_manifest: Vec<String>,
    /// Page served to navigations that miss both network and cache.
    pub offline_page: String,
    /// Substrings marking backend calls that are never intercepted.
    pub bypass_patterns: Vec<String>,
    /// Known in-app routes served network-first.
    pub app_routes: Vec<String>,
    pub sync_tasks: Vec<SyncTaskConfig>,
    pub notifications: NotificationConfig,
    pub cache_writes: CacheWriteMode,
    /// Largest response body a cache partition accepts.
    pub max_entry_bytes: usize,
    /// Transport settings for the HTTP loader.
    pub network: LoaderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let paths = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            origin: Url::parse("http://localhost:3000/").expect("static origin is valid"),
            caches: CacheNames::default(),
            precache_manifest: paths(&[
                "/",
                "/index.html",
                "/offline.html",
                "/manifest.json",
                "/icons/icon-192.png",
                "/icons/icon-512.png",
            ]),
            offline_page: "/offline.html".to_string(),
            bypass_patterns: paths(&["supabase.co", "/rest/v1/", "api."]),
            app_routes: paths(&[
                "/",
                "/atletas",
                "/treinos",
                "/treino-do-dia",
                "/presencas",
                "/metas",
                "/ranking",
                "/avaliacoes",
                "/configuracoes",
            ]),
            sync_tasks: vec![
                SyncTaskConfig {
                    tag: "sync-presencas".to_string(),
                    endpoint: "/api/sync-presencas".to_string(),
                    label: "attendance records".to_string(),
                },
                SyncTaskConfig {
                    tag: "sync-avaliacoes".to_string(),
                    endpoint: "/api/sync-avaliacoes".to_string(),
                    label: "evaluations".to_string(),
                },
            ],
            notifications: NotificationConfig::default(),
            cache_writes: CacheWriteMode::default(),
            max_entry_bytes: 10 * 1024 * 1024,
            network: LoaderConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::LoadFailed(e.to_string()))
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {e}", path.display())))?;
        let config = Self::from_json(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin
            .join(path)
            .map_err(|e| ConfigError::invalid("path", format!("{path}: {e}")))
    }

    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache_manifest.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn offline_page_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.offline_page)
    }

    /// Loader settings with the worker origin filled in.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            origin: Some(self.origin.clone()),
            ..self.network.clone()
        }
    }

    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - the origin is not http/https
    /// - a cache name is empty, or both partitions share a name
    /// - the offline page is not part of the precache manifest
    /// - an app route does not start with `/`
    /// - a sync tag is empty or repeated
    /// - `max_entry_bytes` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ConfigError::invalid("origin", "must be http or https"));
        }

        if self.caches.shell.is_empty() || self.caches.runtime.is_empty() {
            return Err(ConfigError::invalid("caches", "names must not be empty"));
        }
        if self.caches.shell == self.caches.runtime {
            return Err(ConfigError::invalid(
                "caches",
                "shell and runtime partitions must have different names",
            ));
        }

        if !self.precache_manifest.contains(&self.offline_page) {
            return Err(ConfigError::invalid(
                "offline_page",
                format!("{} is not in precache_manifest", self.offline_page),
            ));
        }
        self.precache_urls()?;

        if let Some(route) = self.app_routes.iter().find(|r| !r.starts_with('/')) {
            return Err(ConfigError::invalid(
                "app_routes",
                format!("{route} must start with '/'"),
            ));
        }

        let mut tags = HashSet::new();
        for task in &self.sync_tasks {
            if task.tag.is_empty() {
                return Err(ConfigError::invalid("sync_tasks", "tag must not be empty"));
            }
            if !tags.insert(task.tag.as_str()) {
                return Err(ConfigError::invalid(
                    "sync_tasks",
                    format!("duplicate tag {}", task.tag),
                ));
            }
            self.resolve(&task.endpoint)?;
        }

        if self.max_entry_bytes == 0 {
            return Err(ConfigError::invalid("max_entry_bytes", "must be greater than 0"));
        }

        if self.bypass_patterns.iter().any(|p| p.is_empty()) {
            tracing::warn!("Empty bypass pattern configured; it matches every request");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.caches.shell, "shell-v2");
        assert_eq!(config.caches.runtime, "runtime-v2");
        assert_eq!(config.notifications.reminder_delay(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WorkerConfig::from_json(
            r#"{
                "origin": "https://treino.example/",
                "caches": { "shell": "shell-v3", "runtime": "runtime-v3" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.origin.as_str(), "https://treino.example/");
        assert_eq!(config.caches, CacheNames::for_version("v3"));
        assert_eq!(config.offline_page, "/offline.html");
        assert_eq!(config.sync_tasks.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_resolve_paths() {
        let config = WorkerConfig::default();
        assert_eq!(
            config.offline_page_url().unwrap().as_str(),
            "http://localhost:3000/offline.html"
        );
        assert_eq!(config.loader_config().origin, Some(config.origin.clone()));
    }

    #[test]
    fn test_rejects_identical_cache_names() {
        let config = WorkerConfig {
            caches: CacheNames {
                shell: "cache-v1".into(),
                runtime: "cache-v1".into(),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "caches"
        ));
    }

    #[test]
    fn test_rejects_empty_cache_name() {
        let mut config = WorkerConfig::default();
        config.caches.runtime.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_offline_page_outside_manifest() {
        let config = WorkerConfig {
            offline_page: "/fallback.html".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "offline_page"
        ));
    }

    #[test]
    fn test_rejects_duplicate_sync_tags() {
        let mut config = WorkerConfig::default();
        let first = config.sync_tasks[0].clone();
        config.sync_tasks.push(first);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "sync_tasks"
        ));
    }

    #[test]
    fn test_rejects_relative_app_route() {
        let mut config = WorkerConfig::default();
        config.app_routes.push("ranking".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        assert!(matches!(
            WorkerConfig::from_json("{ not json"),
            Err(ConfigError::LoadFailed(_))
        ));
    }
}
