//! Background sync: one POST per tag, then a summary notification.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use trackside_common::now_millis;
use trackside_net::{Fetcher, Request};
use url::Url;

use crate::config::{ConfigError, SyncTaskConfig, WorkerConfig};
use crate::notification::PushNotificationRouter;
use crate::ServiceWorkerError;

/// Result of one sync invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded { count: u64 },
    Failed { reason: String },
    UnknownTag,
}

/// Body the sync endpoints answer with.
#[derive(Debug, Deserialize)]
struct SyncSummary {
    count: u64,
}

struct SyncTask {
    config: SyncTaskConfig,
    endpoint: Url,
}

/// Runs registered sync tags. Holds no queue; nothing is retried.
pub struct SyncQueueRunner {
    tasks: Vec<SyncTask>,
    fetcher: Arc<dyn Fetcher>,
    router: Arc<PushNotificationRouter>,
}

impl SyncQueueRunner {
    pub fn new(
        config: &WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        router: Arc<PushNotificationRouter>,
    ) -> Result<Self, ConfigError> {
        let tasks = config
            .sync_tasks
            .iter()
            .map(|task| {
                Ok(SyncTask {
                    endpoint: config.resolve(&task.endpoint)?,
                    config: task.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            tasks,
            fetcher,
            router,
        })
    }

    /// Registered tags, in configuration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.config.tag.as_str())
    }

    pub async fn run(&self, tag: &str) -> SyncOutcome {
        let Some(task) = self.tasks.iter().find(|t| t.config.tag == tag) else {
            warn!(tag, "Ignoring unknown sync tag");
            return SyncOutcome::UnknownTag;
        };

        info!(tag, endpoint = %task.endpoint, "Running sync");
        let count = match self.post(task).await {
            Ok(count) => count,
            Err(e) => {
                warn!(tag, error = %e, "Sync failed");
                return SyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let summary = self.router.formatter().sync_complete(
            &task.config.tag,
            &task.config.label,
            count,
            now_millis(),
        );
        self.router.display(summary).await;

        info!(tag, count, "Sync complete");
        SyncOutcome::Succeeded { count }
    }

    async fn post(&self, task: &SyncTask) -> Result<u64, ServiceWorkerError> {
        let request = Request::post(task.endpoint.clone(), None)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::SyncStatus(response.status));
        }

        let summary: SyncSummary = response.json()?;
        Ok(summary.count)
    }
}
