use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{Result, TaskServiceError};
use super::schemas::{CreateBotTaskIn, CreateTaskIn, CreateTaskOut, TaskProjection};
use crate::ledger::{NewTask, TaskQuery, TaskRepository, TaskSource, TaskStats};
use crate::messaging::Publisher;
use crate::observability::Metrics;
use crate::proto::DownloadRequest;

/// Application-facing task operations
///
/// A task exists only once the broker accepted its download request:
/// `create_task` publishes first and inserts the PENDING row afterwards.
/// After an accepted publish `create_task` always succeeds.
#[derive(Clone)]
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<Metrics>,
}

impl TaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            publisher,
            metrics,
        }
    }

    pub async fn create_task(&self, input: CreateTaskIn) -> Result<CreateTaskOut> {
        self.submit(NewTask {
            id: Uuid::now_v7(),
            url: input.url,
            added_at: Utc::now(),
            source: TaskSource::Api,
            from_chat_id: None,
            message_id: None,
        })
        .await
    }

    pub async fn create_bot_task(&self, input: CreateBotTaskIn) -> Result<CreateTaskOut> {
        self.submit(NewTask {
            id: Uuid::now_v7(),
            url: input.url,
            added_at: Utc::now(),
            source: TaskSource::Bot,
            from_chat_id: Some(input.from_chat_id),
            message_id: Some(input.message_id),
        })
        .await
    }

    async fn submit(&self, task: NewTask) -> Result<CreateTaskOut> {
        let request = DownloadRequest::from_task(&task);

        if let Err(e) = self.publisher.send_for_download(&request).await {
            self.metrics.task_publish_failed();
            warn!(task_id = %task.id, url = %task.url, error = %e, "Download request not accepted");
            return Err(TaskServiceError::TaskCreation(e));
        }

        let out = CreateTaskOut {
            id: task.id,
            url: task.url.clone(),
            source: task.source,
            added_at: task.added_at,
        };

        // The request is already queued, so the task exists from here on.
        // A failed insert is left to the worker's pickup to create the row.
        match self.repository.create_task(task).await {
            Ok(_) => info!(task_id = %out.id, source = ?out.source, "Task queued"),
            Err(e) => {
                self.metrics.task_insert_failed();
                warn!(task_id = %out.id, error = %e, "Task queued without a PENDING row");
            }
        }
        self.metrics.task_created();

        Ok(out)
    }

    pub async fn get_task<P: TaskProjection>(&self, id: Uuid) -> Result<P> {
        self.repository
            .get_task(id, P::INCLUDE_META)
            .await?
            .map(P::from_task)
            .ok_or(TaskServiceError::NotFound(id))
    }

    pub async fn get_latest_task<P: TaskProjection>(&self) -> Result<Option<P>> {
        Ok(self
            .repository
            .get_latest_task(P::INCLUDE_META)
            .await?
            .map(P::from_task))
    }

    /// Newest first; prefer the lightweight projection for bulk listings
    pub async fn list_tasks<P: TaskProjection>(&self, query: &TaskQuery) -> Result<Vec<P>> {
        let tasks = self.repository.list_tasks(query, P::INCLUDE_META).await?;
        Ok(tasks.into_iter().map(P::from_task).collect())
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        if !self.repository.delete_task(id).await? {
            return Err(TaskServiceError::NotFound(id));
        }
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<TaskStats> {
        Ok(self.repository.get_stats().await?)
    }
}
