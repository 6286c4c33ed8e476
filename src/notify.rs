//! Notifications sent back to the surface that submitted a task

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::NotifierConfig;
use crate::ledger::Task;
use crate::services::{TaskProjection, TaskSimple};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Status(reqwest::StatusCode),
}

/// Told about every task whose outcome was applied
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, task: &Task) -> Result<(), NotifyError>;
}

/// Build the notifier described by `config`
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url.clone())?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, task: &Task) -> Result<(), NotifyError> {
        info!(
            task_id = %task.id,
            status = %task.status,
            source = ?task.source,
            chat_id = ?task.from_chat_id,
            "Task finished"
        );
        Ok(())
    }
}

/// POSTs the lightweight task projection as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("vidbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, task: &Task) -> Result<(), NotifyError> {
        let body = TaskSimple::from_task(task.clone());
        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        Ok(())
    }
}
