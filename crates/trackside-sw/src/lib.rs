//! # Trackside Service Worker
//!
//! Offline interception layer for the Trackside web app.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (prune stale partitions, claim)
//! - **Cache partitions**: versioned shell and runtime caches
//! - **Fetch interception**: network-first for navigations and app routes,
//!   cache-first for static assets, backend calls passed through untouched
//! - **Background sync**: one-shot POST-and-notify per sync tag
//! - **Push routing**: category formatters and click-to-window resolution
//! - **Control messages**: `SKIP_WAITING`, `SHOW_NOTIFICATION`,
//!   `TEST_NOTIFICATION`
//!
//! ## Architecture
//!
//! ```text
//! HostAdapter (host events → worker calls)
//!     │
//!     └── ServiceWorker
//!             ├── RouteClassifier ── ignore | bypass | app route | asset
//!             ├── FetchStrategyEngine
//!             │       └── CacheStore (shell-vN, runtime-vN)
//!             ├── SyncQueueRunner ─────────┐
//!             ├── ControlMessageDispatcher ┤
//!             └── PushNotificationRouter ◄─┘
//!                     ├── Notifier
//!                     └── WindowClients
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod host;
pub mod message;
pub mod notification;
pub mod route;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheEntry, CacheStore};
pub use clients::{Client, Clients, WindowClients};
pub use config::{CacheNames, ConfigError, WorkerConfig};
pub use host::{HostAdapter, HostEvent, HostHandle};
pub use message::{ControlMessage, ControlMessageDispatcher, MessageOutcome};
pub use notification::{
    ClickOutcome, NotificationCenter, NotificationClick, NotificationDescriptor, Notifier,
    PushNotificationRouter,
};
pub use route::{RouteClass, RouteClassifier};
pub use strategy::FetchStrategyEngine;
pub use sync::{SyncOutcome, SyncQueueRunner};
pub use worker::{FetchDisposition, HostServices, ServiceWorker, ServiceWorkerState, WorkerSignal};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Precache failed: {0}")]
    Precache(String),

    #[error("Network error: {0}")]
    Network(#[from] trackside_net::NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync endpoint answered {0}")]
    SyncStatus(http::StatusCode),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors raised by cache partitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("entry for {key} is {size} bytes, limit is {limit}")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    #[error("unknown cache partition: {0}")]
    UnknownPartition(String),
}
