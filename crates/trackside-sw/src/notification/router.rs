//! Push handling and notification click routing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use trackside_common::{now_millis, LogErrorExt};
use url::Url;

use super::format::{Category, NotificationFormatter};
use super::{NotificationData, NotificationDescriptor, NotificationInput, Notifier};
use crate::clients::WindowClients;
use crate::config::CategoryPaths;

/// A user interaction with a displayed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClick {
    /// Action button id; `None` for a click on the notification body.
    #[serde(default)]
    pub action: Option<String>,
    pub notification: NotificationDescriptor,
}

/// What a click asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickDecision {
    Dismiss,
    Later,
    Navigate(String),
}

impl ClickDecision {
    /// Decision table keyed by `(action, data.type)`.
    pub fn resolve(action: Option<&str>, data: &NotificationData, paths: &CategoryPaths) -> Self {
        match action {
            Some("dismiss") => Self::Dismiss,
            Some("later") => Self::Later,
            Some("view") => {
                let path = match Category::from_type(&data.kind) {
                    Some(Category::Training) => &paths.training,
                    Some(Category::Goal) => &paths.goals,
                    Some(Category::Ranking) => &paths.ranking,
                    Some(Category::Absence) => &paths.attendance,
                    None => return Self::Navigate(Self::data_url(data)),
                };
                Self::Navigate(path.clone())
            }
            _ => Self::Navigate(Self::data_url(data)),
        }
    }

    fn data_url(data: &NotificationData) -> String {
        if data.url.is_empty() {
            "/".to_string()
        } else {
            data.url.clone()
        }
    }
}

/// Result of handling a click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    Dismissed,
    ReminderScheduled { tag: String, delay_secs: u64 },
    Focused { client_id: String, url: String },
    Navigated { client_id: String, url: String },
    Opened { client_id: String, url: String },
    Failed { url: String, reason: String },
}

/// Displays push notifications and routes clicks to windows.
pub struct PushNotificationRouter {
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn WindowClients>,
    formatter: NotificationFormatter,
    origin: Url,
    reminder_delay: Duration,
}

impl PushNotificationRouter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        clients: Arc<dyn WindowClients>,
        formatter: NotificationFormatter,
        origin: Url,
    ) -> Self {
        let reminder_delay = formatter.config().reminder_delay();
        Self {
            notifier,
            clients,
            formatter,
            origin,
            reminder_delay,
        }
    }

    pub fn formatter(&self) -> &NotificationFormatter {
        &self.formatter
    }

    /// Build the descriptor for a push payload without displaying it.
    ///
    /// Bodies that are not a JSON object become the notification text. Fields
    /// of a JSON object are merged with defaults one by one. JSON without a
    /// title whose `data.type` names a category goes through that formatter.
    pub fn descriptor_for_push(&self, payload: Option<&[u8]>, now: u64) -> NotificationDescriptor {
        let bytes = match payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return self.formatter.from_input(NotificationInput::default(), now),
        };

        let input = match serde_json::from_slice::<Value>(bytes) {
            Ok(value) if value.is_object() => NotificationInput::from_value(&value),
            Ok(_) => {
                debug!("Push payload is not a JSON object, using text");
                return self.formatter.from_text(&String::from_utf8_lossy(bytes), now);
            }
            Err(e) => {
                debug!(error = %e, "Push payload is not JSON, using text");
                return self.formatter.from_text(&String::from_utf8_lossy(bytes), now);
            }
        };

        if input.title().is_none() {
            if let (Some(category), Some(data)) = (input.category(), input.data.as_ref()) {
                match self.formatter.format_category(category, data, now) {
                    Ok(descriptor) => return descriptor,
                    Err(e) => warn!(
                        error = %e,
                        category = category.as_str(),
                        "Bad category data in push"
                    ),
                }
            }
        }
        self.formatter.from_input(input, now)
    }

    /// Handle a push event; returns the descriptor that was displayed.
    pub async fn on_push(&self, payload: Option<&[u8]>) -> NotificationDescriptor {
        let descriptor = self.descriptor_for_push(payload, now_millis());
        self.display(descriptor).await
    }

    /// Display a descriptor, falling back to a minimal one if the platform
    /// rejects it.
    pub async fn display(&self, descriptor: NotificationDescriptor) -> NotificationDescriptor {
        match self.notifier.show(descriptor.clone()).await {
            Ok(()) => descriptor,
            Err(e) => {
                warn!(
                    error = %e,
                    tag = %descriptor.tag,
                    "Notification display failed, showing fallback"
                );
                let fallback = self.formatter.fallback(now_millis());
                self.notifier
                    .show(fallback.clone())
                    .await
                    .log_error("Fallback notification failed");
                fallback
            }
        }
    }

    /// Handle a click on a displayed notification.
    pub async fn on_click(&self, click: NotificationClick) -> ClickOutcome {
        let NotificationClick {
            action,
            notification,
        } = click;

        self.notifier
            .close(notification.tag.clone())
            .await
            .log_warn("Failed to close clicked notification");

        let decision = ClickDecision::resolve(
            action.as_deref(),
            &notification.data,
            &self.formatter.config().paths,
        );
        debug!(
            action = ?action,
            kind = %notification.data.kind,
            decision = ?decision,
            "Notification clicked"
        );

        match decision {
            ClickDecision::Dismiss => ClickOutcome::Dismissed,
            ClickDecision::Later => self.schedule_reminder(&notification),
            ClickDecision::Navigate(path) => self.focus_or_open(&path).await,
        }
    }

    /// Plain timer; the reminder is lost if the process goes away first.
    fn schedule_reminder(&self, original: &NotificationDescriptor) -> ClickOutcome {
        let reminder = self.formatter.reminder(original);
        let tag = reminder.tag.clone();
        let delay = self.reminder_delay;
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notifier
                .show(reminder)
                .await
                .log_warn("Reminder notification failed");
        });

        info!(tag = %tag, delay_secs = delay.as_secs(), "Reminder scheduled");
        ClickOutcome::ReminderScheduled {
            tag,
            delay_secs: delay.as_secs(),
        }
    }

    /// Focus a window already showing the target, else reuse one, else open
    /// a new one. Each failure falls through to the next step.
    async fn focus_or_open(&self, path: &str) -> ClickOutcome {
        let target = match self.origin.join(path) {
            Ok(url) => url,
            Err(e) => {
                warn!(path, error = %e, "Cannot resolve notification target");
                return ClickOutcome::Failed {
                    url: path.to_string(),
                    reason: e.to_string(),
                };
            }
        };

        let windows = self
            .clients
            .match_all()
            .await
            .log_warn("Failed to enumerate windows")
            .unwrap_or_default();

        if let Some(window) = windows.iter().find(|c| c.url.as_str().contains(target.as_str())) {
            if self
                .clients
                .focus(window.id.clone())
                .await
                .log_warn("Failed to focus matching window")
                .is_some()
            {
                return ClickOutcome::Focused {
                    client_id: window.id.clone(),
                    url: target.to_string(),
                };
            }
        }

        if let Some(window) = windows.iter().find(|c| c.can_focus_and_navigate()) {
            let focused = self
                .clients
                .focus(window.id.clone())
                .await
                .log_warn("Failed to focus window");
            if focused.is_some() {
                let navigated = self
                    .clients
                    .navigate(window.id.clone(), target.clone())
                    .await
                    .log_warn("Failed to navigate window");
                if navigated.is_some() {
                    return ClickOutcome::Navigated {
                        client_id: window.id.clone(),
                        url: target.to_string(),
                    };
                }
            }
        }

        match self.clients.open_window(target.clone()).await {
            Ok(client) => ClickOutcome::Opened {
                client_id: client.id,
                url: target.to_string(),
            },
            Err(e) => {
                warn!(url = %target, error = %e, "Failed to open window");
                ClickOutcome::Failed {
                    url: target.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
