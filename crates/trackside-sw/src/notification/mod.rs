//! Notification descriptors, the display seam and push routing.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ServiceWorkerError;

pub mod format;
pub mod router;

pub use format::{Category, CategoryNotice, NotificationFormatter};
pub use router::{ClickDecision, ClickOutcome, NotificationClick, PushNotificationRouter};

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
            icon: None,
        }
    }
}

/// Navigation metadata carried by a notification until it is clicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: u64,
    /// Domain fields (athlete name, position, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Everything needed to display one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
}

/// Read a field as `T`, or `None` when it has some other JSON type.
///
/// Use with `#[serde(default, deserialize_with = "lenient")]`; a badly typed
/// field then takes its default.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`] for lists: elements of the wrong type are skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

/// Loosely shaped notification fields, as found in push bodies and
/// `SHOW_NOTIFICATION` messages. Missing or mistyped fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub badge: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub data: Option<DataInput>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub actions: Option<Vec<ActionInput>>,
    #[serde(default, deserialize_with = "lenient")]
    pub require_interaction: Option<bool>,
}

impl NotificationInput {
    /// Read an input out of any JSON value. Non-objects give an empty input.
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        Self::deserialize(value).unwrap_or_default()
    }

    /// Title, if present and non-blank.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// The category named by `data.type`, if it is a known one.
    pub fn category(&self) -> Option<Category> {
        self.data
            .as_ref()
            .and_then(|d| d.kind.as_deref())
            .and_then(Category::from_type)
    }
}

/// Loosely shaped action button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionInput {
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub icon: Option<String>,
}

impl ActionInput {
    /// Buttons need an id; a missing title falls back to it.
    pub fn into_action(self) -> Option<NotificationAction> {
        let action = self.action.filter(|a| !a.is_empty())?;
        Some(NotificationAction {
            title: self.title.unwrap_or_else(|| action.clone()),
            action,
            icon: self.icon,
        })
    }
}

/// Loosely shaped `data` block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataInput {
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Host capability: put notifications on screen.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Display a notification, replacing any visible one with the same tag.
    async fn show(&self, descriptor: NotificationDescriptor) -> Result<(), ServiceWorkerError>;

    /// Close the visible notification with this tag, if any.
    async fn close(&self, tag: String) -> Result<(), ServiceWorkerError>;
}

/// In-memory [`Notifier`] that tracks what is on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    visible: RwLock<Vec<NotificationDescriptor>>,
    history: RwLock<Vec<NotificationDescriptor>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently on screen.
    pub async fn visible(&self) -> Vec<NotificationDescriptor> {
        self.visible.read().await.clone()
    }

    /// Every notification ever shown, in order.
    pub async fn history(&self) -> Vec<NotificationDescriptor> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show(&self, descriptor: NotificationDescriptor) -> Result<(), ServiceWorkerError> {
        if descriptor.title.is_empty() {
            return Err(ServiceWorkerError::Notification(
                "notification title must not be empty".into(),
            ));
        }
        debug!(tag = %descriptor.tag, title = %descriptor.title, "Showing notification");
        let mut visible = self.visible.write().await;
        visible.retain(|n| n.tag != descriptor.tag);
        visible.push(descriptor.clone());
        self.history.write().await.push(descriptor);
        Ok(())
    }

    async fn close(&self, tag: String) -> Result<(), ServiceWorkerError> {
        self.visible.write().await.retain(|n| n.tag != tag);
        Ok(())
    }
}
