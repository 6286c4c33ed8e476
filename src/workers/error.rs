use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::consumer::settle;
use super::traits::{ResultWorker, WorkerError, WorkerType};
use crate::ledger::TaskRepository;
use crate::notify::Notifier;
use crate::observability::Metrics;
use crate::proto::{self, ErrorResult};

/// Marks tasks FAILED with the downloader's message
pub struct ErrorResultWorker {
    queue: String,
    repository: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl ErrorResultWorker {
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

fn error_text(result: &ErrorResult) -> String {
    match result.details.as_deref() {
        Some(details) if !details.is_empty() => format!("{}: {}", result.message, details),
        _ => result.message.clone(),
    }
}

#[async_trait]
impl ResultWorker for ErrorResultWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::ERROR
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), WorkerError> {
        let result: ErrorResult = proto::decode(payload)?;
        let task_id = result.task_id()?;
        let error = error_text(&result);

        info!(task_id = %task_id, error = %error, "Applying error result");

        let transition = self
            .repository
            .fail_task(task_id, &error, result.yt_dlp_version.as_deref())
            .await?;
        settle(transition, self.notifier.as_ref(), &self.metrics).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FjallStore, NewFile, NewTask, TaskSource, TaskStatus};
    use crate::notify::LogNotifier;
    use chrono::Utc;
    use prost::Message;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn payload(task_id: Uuid) -> Vec<u8> {
        ErrorResult {
            task_id: task_id.to_string(),
            message: "Download failed".to_string(),
            details: Some("HTTP Error 404".to_string()),
            yt_dlp_version: None,
        }
        .encode_to_vec()
    }

    #[test]
    fn test_error_text() {
        let result = ErrorResult {
            message: "boom".to_string(),
            details: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(error_text(&result), "boom");
    }

    #[tokio::test]
    async fn test_error_marks_failed_but_never_undoes_done() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FjallStore::open(temp.path().join("tasks")).unwrap());
        let metrics = Arc::new(Metrics::new());
        let worker =
            ErrorResultWorker::new("error", store.clone(), Arc::new(LogNotifier), metrics.clone());

        let failing = NewTask {
            id: Uuid::now_v7(),
            url: "https://example.com/a".to_string(),
            added_at: Utc::now(),
            source: TaskSource::Api,
            from_chat_id: None,
            message_id: None,
        };
        let done = NewTask {
            id: Uuid::now_v7(),
            url: "https://example.com/b".to_string(),
            ..failing.clone()
        };
        store.create_task(failing.clone()).await.unwrap();
        store.create_task(done.clone()).await.unwrap();
        store.complete_task(done.id, NewFile::default(), None).await.unwrap();

        worker.handle(&payload(failing.id)).await.unwrap();
        worker.handle(&payload(done.id)).await.unwrap();

        let failed = store.get_task(failing.id, false).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Download failed: HTTP Error 404"));

        let still_done = store.get_task(done.id, false).await.unwrap().unwrap();
        assert_eq!(still_done.status, TaskStatus::Done);
        assert_eq!(metrics.snapshot().results_ignored, 1);
    }

    #[tokio::test]
    async fn test_garbage_is_permanent() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FjallStore::open(temp.path().join("tasks")).unwrap());
        let worker =
            ErrorResultWorker::new("error", store, Arc::new(LogNotifier), Arc::new(Metrics::new()));

        let err = worker.handle(b"\xff\xff\xff").await.unwrap_err();
        assert!(err.is_permanent());
    }
}
