use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::consumer::settle;
use super::traits::{ResultWorker, WorkerError, WorkerType};
use crate::ledger::TaskRepository;
use crate::notify::Notifier;
use crate::observability::Metrics;
use crate::proto::{self, ProtoError, SuccessResult};

/// Marks tasks DONE and attaches the downloaded file
pub struct SuccessResultWorker {
    queue: String,
    repository: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl SuccessResultWorker {
    pub fn new(
        queue: impl Into<String>,
        repository: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue: queue.into(),
            repository,
            notifier,
            metrics,
        }
    }
}

#[async_trait]
impl ResultWorker for SuccessResultWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::SUCCESS
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), WorkerError> {
        let result: SuccessResult = proto::decode(payload)?;
        let task_id = result.task_id()?;
        let file = result
            .file
            .ok_or(ProtoError::MissingField("file"))?
            .into_new_file()?;

        info!(task_id = %task_id, name = ?file.name, cached = file.cache.is_some(), "Applying success result");

        let transition = self
            .repository
            .complete_task(task_id, file, result.yt_dlp_version.as_deref())
            .await?;
        settle(transition, self.notifier.as_ref(), &self.metrics).await;

        Ok(())
    }
}
