//! Host adapter: turns host events arriving on a channel into worker calls.
//!
//! Each event runs as its own task, so a slow fetch never holds up a push
//! or another fetch. Events the host waits on carry a one-shot reply.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use trackside_net::Request;

use crate::message::MessageOutcome;
use crate::notification::{ClickOutcome, NotificationClick, NotificationDescriptor};
use crate::sync::SyncOutcome;
use crate::worker::{FetchDisposition, ServiceWorker, WorkerSignal};
use crate::ServiceWorkerError;

/// Events the host platform delivers to the worker.
#[derive(Debug)]
pub enum HostEvent {
    Install {
        reply: oneshot::Sender<Result<usize, ServiceWorkerError>>,
    },
    Activate {
        reply: oneshot::Sender<Result<Vec<String>, ServiceWorkerError>>,
    },
    Fetch {
        request: Request,
        reply: oneshot::Sender<FetchDisposition>,
    },
    Sync {
        tag: String,
        reply: oneshot::Sender<SyncOutcome>,
    },
    Push {
        payload: Option<Bytes>,
        reply: oneshot::Sender<NotificationDescriptor>,
    },
    NotificationClick {
        click: NotificationClick,
        reply: oneshot::Sender<ClickOutcome>,
    },
    /// Messages are fire-and-forget unless a reply is attached.
    Message {
        message: Value,
        reply: Option<oneshot::Sender<MessageOutcome>>,
    },
    Shutdown,
}

/// Drives a [`ServiceWorker`] from host events and reacts to its
/// lifecycle signals.
pub struct HostAdapter {
    worker: Arc<ServiceWorker>,
    signals: mpsc::UnboundedReceiver<WorkerSignal>,
    observer: Option<mpsc::UnboundedSender<WorkerSignal>>,
}

impl HostAdapter {
    pub fn new(worker: ServiceWorker, signals: mpsc::UnboundedReceiver<WorkerSignal>) -> Self {
        Self {
            worker: Arc::new(worker),
            signals,
            observer: None,
        }
    }

    /// Forward every lifecycle signal to `observer` as well.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<WorkerSignal>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the event loop.
    pub fn spawn(self) -> (HostHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(events_rx));
        (HostHandle { events: events_tx }, task)
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        info!("Host adapter started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HostEvent::Shutdown) | None => break,
                    Some(event) => self.dispatch(event),
                },
                Some(signal) = self.signals.recv() => self.on_signal(signal),
            }
        }
        info!("Host adapter stopped");
    }

    fn dispatch(&self, event: HostEvent) {
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            match event {
                HostEvent::Install { reply } => {
                    let _ = reply.send(worker.on_install().await);
                }
                HostEvent::Activate { reply } => {
                    let _ = reply.send(worker.on_activate().await);
                }
                HostEvent::Fetch { request, reply } => {
                    let _ = reply.send(worker.on_fetch(request).await);
                }
                HostEvent::Sync { tag, reply } => {
                    let _ = reply.send(worker.on_sync(&tag).await);
                }
                HostEvent::Push { payload, reply } => {
                    let _ = reply.send(worker.on_push(payload.as_deref()).await);
                }
                HostEvent::NotificationClick { click, reply } => {
                    let _ = reply.send(worker.on_notification_click(click).await);
                }
                HostEvent::Message { message, reply } => {
                    let outcome = worker.on_message(&message).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                HostEvent::Shutdown => {}
            }
        });
    }

    fn on_signal(&self, signal: WorkerSignal) {
        debug!(signal = ?signal, "Worker signal");
        if let Some(observer) = &self.observer {
            let _ = observer.send(signal);
        }

        if signal == WorkerSignal::SkipWaiting {
            let worker = Arc::clone(&self.worker);
            tokio::spawn(async move {
                if let Some(deleted) = worker.skip_waiting().await {
                    info!(deleted = deleted.len(), "Activated on skip waiting");
                }
            });
        }
    }
}

/// Cloneable sender side of a running [`HostAdapter`].
#[derive(Debug, Clone)]
pub struct HostHandle {
    events: mpsc::UnboundedSender<HostEvent>,
}

impl HostHandle {
    pub fn send(&self, event: HostEvent) -> Result<(), ServiceWorkerError> {
        self.events
            .send(event)
            .map_err(|_| ServiceWorkerError::StateError("host adapter stopped".into()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HostEvent,
    ) -> Result<T, ServiceWorkerError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response
            .await
            .map_err(|_| ServiceWorkerError::StateError("event dropped without a reply".into()))
    }

    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        self.request(|reply| HostEvent::Install { reply }).await?
    }

    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.request(|reply| HostEvent::Activate { reply }).await?
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchDisposition, ServiceWorkerError> {
        self.request(|reply| HostEvent::Fetch { request, reply }).await
    }

    pub async fn sync(&self, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        let tag = tag.to_string();
        self.request(|reply| HostEvent::Sync { tag, reply }).await
    }

    pub async fn push(
        &self,
        payload: Option<Bytes>,
    ) -> Result<NotificationDescriptor, ServiceWorkerError> {
        self.request(|reply| HostEvent::Push { payload, reply }).await
    }

    pub async fn notification_click(
        &self,
        click: NotificationClick,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.request(|reply| HostEvent::NotificationClick { click, reply }).await
    }

    /// Post a message and wait for its outcome.
    pub async fn message(&self, message: Value) -> Result<MessageOutcome, ServiceWorkerError> {
        self.request(|reply| HostEvent::Message {
            message,
            reply: Some(reply),
        })
        .await
    }

    /// Post a message without waiting.
    pub fn post_message(&self, message: Value) -> Result<(), ServiceWorkerError> {
        self.send(HostEvent::Message { message, reply: None })
    }

    pub fn shutdown(&self) -> Result<(), ServiceWorkerError> {
        self.send(HostEvent::Shutdown)
    }
}
