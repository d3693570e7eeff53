//! Control messages posted into the worker by app pages.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trackside_common::{now_millis, LogErrorExt};

use crate::notification::{NotificationDescriptor, NotificationInput, PushNotificationRouter};
use crate::worker::WorkerSignal;

/// A message from a page, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SkipWaiting,
    ShowNotification {
        notification: Option<NotificationInput>,
    },
    TestNotification {
        message: Option<String>,
    },
    Unknown,
}

impl ControlMessage {
    /// Read a message by its `type` string. Returns `None` when there is no
    /// string `type`. Other fields are read leniently: a mistyped one counts
    /// as absent.
    pub fn from_value(message: &Value) -> Option<Self> {
        let kind = message.get("type")?.as_str()?;
        Some(match kind {
            "SKIP_WAITING" => Self::SkipWaiting,
            "SHOW_NOTIFICATION" => Self::ShowNotification {
                notification: message
                    .get("notification")
                    .map(NotificationInput::from_value),
            },
            "TEST_NOTIFICATION" => Self::TestNotification {
                message: message
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => Self::Unknown,
        })
    }
}

/// What a message led to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "notification", rename_all = "snake_case")]
pub enum MessageOutcome {
    SkipWaiting,
    Displayed(NotificationDescriptor),
    Dropped,
    Ignored,
}

pub struct ControlMessageDispatcher {
    router: Arc<PushNotificationRouter>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
}

impl ControlMessageDispatcher {
    pub fn new(
        router: Arc<PushNotificationRouter>,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Self {
        Self { router, signals }
    }

    /// Route a raw message. Malformed messages are ignored.
    pub async fn dispatch(&self, message: &Value) -> MessageOutcome {
        match ControlMessage::from_value(message) {
            Some(parsed) => self.handle(parsed).await,
            None => {
                warn!("Ignoring control message without a string type");
                MessageOutcome::Ignored
            }
        }
    }

    pub async fn handle(&self, message: ControlMessage) -> MessageOutcome {
        match message {
            ControlMessage::SkipWaiting => {
                info!("Skip waiting requested");
                self.signals
                    .send(WorkerSignal::SkipWaiting)
                    .log_warn("Lifecycle signal receiver is gone");
                MessageOutcome::SkipWaiting
            }
            ControlMessage::ShowNotification { notification } => {
                let Some(input) = notification.filter(|n| n.title().is_some()) else {
                    warn!("Dropping SHOW_NOTIFICATION without a title");
                    return MessageOutcome::Dropped;
                };
                let descriptor = self.describe(input);
                MessageOutcome::Displayed(self.router.display(descriptor).await)
            }
            ControlMessage::TestNotification { message } => {
                let descriptor = self
                    .router
                    .formatter()
                    .diagnostic(message.as_deref(), now_millis());
                MessageOutcome::Displayed(self.router.display(descriptor).await)
            }
            ControlMessage::Unknown => {
                debug!("Ignoring unknown control message");
                MessageOutcome::Ignored
            }
        }
    }

    /// A known `data.type` goes through its category formatter even when the
    /// message carries its own title.
    fn describe(&self, input: NotificationInput) -> NotificationDescriptor {
        let formatter = self.router.formatter();
        let now = now_millis();
        if let (Some(category), Some(data)) = (input.category(), input.data.as_ref()) {
            match formatter.format_category(category, data, now) {
                Ok(descriptor) => return descriptor,
                Err(e) => warn!(
                    error = %e,
                    category = category.as_str(),
                    "Bad category data, using raw fields"
                ),
            }
        }
        formatter.from_input(input, now)
    }
}
