//! The worker: one entry point per host event, plus the lifecycle state
//! machine.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};
use trackside_common::LogErrorExt;
use trackside_net::{Fetcher, Request, Response};

use crate::cache::{CacheStorage, CacheStore};
use crate::clients::WindowClients;
use crate::config::WorkerConfig;
use crate::message::{ControlMessageDispatcher, MessageOutcome};
use crate::notification::{
    ClickOutcome, NotificationClick, NotificationDescriptor, NotificationFormatter, Notifier,
    PushNotificationRouter,
};
use crate::route::RouteClassifier;
use crate::strategy::FetchStrategyEngine;
use crate::sync::{SyncOutcome, SyncQueueRunner};
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Lifecycle signals sent to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum WorkerSignal {
    StateChange(ServiceWorkerState),
    /// Activate the waiting version now.
    SkipWaiting,
    /// Open clients were taken over at activation.
    ClientsClaimed(usize),
}

/// How the host should complete an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Let the request go to the network as if no worker existed.
    Passthrough,
    Respond(Response),
}

/// Host capabilities the worker runs against.
#[derive(Clone)]
pub struct HostServices {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub clients: Arc<dyn WindowClients>,
}

/// One deployed version of the worker.
pub struct ServiceWorker {
    config: WorkerConfig,
    state: RwLock<ServiceWorkerState>,
    cache: CacheStore,
    classifier: RouteClassifier,
    strategies: FetchStrategyEngine,
    sync: SyncQueueRunner,
    router: Arc<PushNotificationRouter>,
    messages: ControlMessageDispatcher,
    services: HostServices,
    signals: mpsc::UnboundedSender<WorkerSignal>,
}

impl ServiceWorker {
    /// Create a worker over fresh cache storage.
    pub fn new(
        config: WorkerConfig,
        services: HostServices,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerSignal>), ServiceWorkerError> {
        Self::with_storage(config, services, Arc::new(RwLock::new(CacheStorage::new())))
    }

    /// Create a worker over existing cache storage, such as one an older
    /// version populated.
    pub fn with_storage(
        config: WorkerConfig,
        services: HostServices,
        storage: Arc<RwLock<CacheStorage>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerSignal>), ServiceWorkerError> {
        config.validate()?;

        let (signals, signal_rx) = mpsc::unbounded_channel();
        let cache =
            CacheStore::with_storage(storage, config.caches.clone(), config.max_entry_bytes);
        let strategies = FetchStrategyEngine::new(
            cache.clone(),
            Arc::clone(&services.fetcher),
            config.offline_page_url()?,
            config.cache_writes,
        );
        let router = Arc::new(PushNotificationRouter::new(
            Arc::clone(&services.notifier),
            Arc::clone(&services.clients),
            NotificationFormatter::new(config.notifications.clone()),
            config.origin.clone(),
        ));
        let sync = SyncQueueRunner::new(
            &config,
            Arc::clone(&services.fetcher),
            Arc::clone(&router),
        )?;
        let messages = ControlMessageDispatcher::new(Arc::clone(&router), signals.clone());

        let worker = Self {
            classifier: RouteClassifier::from_config(&config),
            config,
            state: RwLock::new(ServiceWorkerState::Parsed),
            cache,
            strategies,
            sync,
            router,
            messages,
            services,
            signals,
        };
        Ok((worker, signal_rx))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        *self.state.write().await = state;
        self.announce(state);
    }

    fn announce(&self, state: ServiceWorkerState) {
        info!(state = ?state, "Worker state changed");
        self.signal(WorkerSignal::StateChange(state));
    }

    fn signal(&self, signal: WorkerSignal) {
        self.signals
            .send(signal)
            .log_warn("Lifecycle signal receiver is gone");
    }

    /// Check for `expected` and move to `next` under one write guard.
    async fn transition(
        &self,
        expected: ServiceWorkerState,
        next: ServiceWorkerState,
        event: &str,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            if *state != expected {
                return Err(ServiceWorkerError::StateError(format!(
                    "{event} requires state {expected:?}, worker is {:?}",
                    *state
                )));
            }
            *state = next;
        }
        self.announce(next);
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Install: precache the shell. Any failure makes this version redundant.
    pub async fn on_install(&self) -> Result<usize, ServiceWorkerError> {
        self.transition(
            ServiceWorkerState::Parsed,
            ServiceWorkerState::Installing,
            "install",
        )
        .await?;

        let result: Result<usize, ServiceWorkerError> = async {
            let manifest = self.config.precache_urls()?;
            self.cache
                .precache(&manifest, self.services.fetcher.as_ref())
                .await
        }
        .await;

        match result {
            Ok(count) => {
                self.set_state(ServiceWorkerState::Installed).await;
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Activate: drop partitions from other versions and take control of
    /// open clients. Returns the deleted partition names.
    pub async fn on_activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.transition(
            ServiceWorkerState::Installed,
            ServiceWorkerState::Activating,
            "activate",
        )
        .await?;
        Ok(self.activate().await)
    }

    /// Activate right away if an installed version is waiting. Returns the
    /// deleted partition names, or `None` when nothing was waiting.
    pub async fn skip_waiting(&self) -> Option<Vec<String>> {
        let waiting = self
            .transition(
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                "skip waiting",
            )
            .await;
        if let Err(e) = waiting {
            debug!(reason = %e, "Skip waiting with nothing waiting");
            return None;
        }
        Some(self.activate().await)
    }

    async fn activate(&self) -> Vec<String> {
        let deleted = self
            .cache
            .prune_stale_versions(&self.config.caches.current())
            .await;

        if let Some(claimed) = self
            .services
            .clients
            .claim()
            .await
            .log_warn("Failed to claim clients")
        {
            self.signal(WorkerSignal::ClientsClaimed(claimed));
        }

        self.set_state(ServiceWorkerState::Activated).await;
        deleted
    }

    // ==================== Functional events ====================

    /// Classify and serve a request. Only an activated worker intercepts.
    pub async fn on_fetch(&self, request: Request) -> FetchDisposition {
        if self.state().await != ServiceWorkerState::Activated {
            return FetchDisposition::Passthrough;
        }

        let class = self.classifier.classify(&request);
        match self.strategies.handle(class, request).await {
            Some(response) => FetchDisposition::Respond(response),
            None => FetchDisposition::Passthrough,
        }
    }

    pub async fn on_sync(&self, tag: &str) -> SyncOutcome {
        self.sync.run(tag).await
    }

    pub async fn on_push(&self, payload: Option<&[u8]>) -> NotificationDescriptor {
        self.router.on_push(payload).await
    }

    pub async fn on_notification_click(&self, click: NotificationClick) -> ClickOutcome {
        self.router.on_click(click).await
    }

    pub async fn on_message(&self, message: &Value) -> MessageOutcome {
        self.messages.dispatch(message).await
    }
}
