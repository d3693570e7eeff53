//! Window clients the worker can focus, navigate and open.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

// ==================== Client ====================

/// A page or worker the service worker can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub url: Url,
    #[serde(default)]
    pub client_type: ClientType,
    #[serde(default)]
    pub frame_type: FrameType,
    #[serde(default)]
    pub visibility_state: VisibilityState,
    #[serde(default)]
    pub focused: bool,
    /// Whether this worker controls the client.
    #[serde(default)]
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// Frame type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameType {
    Auxiliary,
    #[default]
    TopLevel,
    Nested,
    None,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Hidden,
    #[default]
    Visible,
}

impl Client {
    /// A top-level window.
    pub fn window(id: &str, url: Url, focused: bool) -> Self {
        Self {
            id: id.to_string(),
            url,
            client_type: ClientType::Window,
            frame_type: FrameType::TopLevel,
            visibility_state: VisibilityState::Visible,
            focused,
            controlled: false,
        }
    }

    /// Top-level and auxiliary windows can be focused and navigated;
    /// nested frames and workers cannot.
    pub fn can_focus_and_navigate(&self) -> bool {
        self.client_type == ClientType::Window && self.frame_type != FrameType::Nested
    }
}

// ==================== WindowClients ====================

/// Host capability: enumerate and drive open windows.
#[async_trait]
pub trait WindowClients: Send + Sync {
    /// All window clients, controlled or not, in a stable order.
    async fn match_all(&self) -> Result<Vec<Client>, ServiceWorkerError>;

    async fn focus(&self, id: String) -> Result<(), ServiceWorkerError>;

    async fn navigate(&self, id: String, url: Url) -> Result<(), ServiceWorkerError>;

    async fn open_window(&self, url: Url) -> Result<Client, ServiceWorkerError>;

    /// Take control of every open client. Returns how many were claimed.
    async fn claim(&self) -> Result<usize, ServiceWorkerError>;
}

// ==================== Clients ====================

/// In-memory [`WindowClients`].
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<Vec<Client>>,
    next_id: AtomicU64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, replacing one with the same id.
    pub async fn add(&self, client: Client) {
        let mut clients = self.clients.write().await;
        clients.retain(|c| c.id != client.id);
        clients.push(client);
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.iter().find(|c| c.id == id).cloned()
    }

    /// Every client, windows or not.
    pub async fn all(&self) -> Vec<Client> {
        self.clients.read().await.clone()
    }

    fn window_mut<'a>(
        clients: &'a mut [Client],
        id: &str,
        op: &str,
    ) -> Result<&'a mut Client, ServiceWorkerError> {
        let client = clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if !client.can_focus_and_navigate() {
            return Err(ServiceWorkerError::Client(format!(
                "Can only {op} top-level window clients"
            )));
        }
        Ok(client)
    }
}

#[async_trait]
impl WindowClients for Clients {
    async fn match_all(&self) -> Result<Vec<Client>, ServiceWorkerError> {
        Ok(self
            .clients
            .read()
            .await
            .iter()
            .filter(|c| c.client_type == ClientType::Window)
            .cloned()
            .collect())
    }

    async fn focus(&self, id: String) -> Result<(), ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        Self::window_mut(&mut clients, &id, "focus")?;
        for client in clients.iter_mut() {
            client.focused = client.id == id;
            if client.focused {
                client.visibility_state = VisibilityState::Visible;
            }
        }
        debug!(client = %id, "Focused client");
        Ok(())
    }

    async fn navigate(&self, id: String, url: Url) -> Result<(), ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let client = Self::window_mut(&mut clients, &id, "navigate")?;
        debug!(client = %id, from = %client.url, to = %url, "Navigating client");
        client.url = url;
        Ok(())
    }

    async fn open_window(&self, url: Url) -> Result<Client, ServiceWorkerError> {
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut client = Client::window(&id, url, true);
        client.controlled = true;

        let mut clients = self.clients.write().await;
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client.clone());
        debug!(client = %id, url = %client.url, "Opened window");
        Ok(client)
    }

    async fn claim(&self) -> Result<usize, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        Ok(claimed)
    }
}
