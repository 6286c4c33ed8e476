use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use bon::Builder;
use tracing::{debug, error, info, warn};

use super::ytdlp::{DownloadedMedia, Downloader};
use crate::ledger::{File, NewTask, TaskRepository, Transition};
use crate::messaging::{MessagingError, Publisher};
use crate::observability::Metrics;
use crate::proto::{self, CacheInfo, DownloadRequest, ErrorResult, FileInfo, SuccessResult};
use crate::queue::{BrokerError, Delivery};
use crate::storage::StorageClient;

/// How one input message was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Downloaded and a success result published
    Downloaded,
    /// Served from a previous download of the same url
    Reused,
    /// Download failed and an error result published
    Failed,
    /// Task already finished or owned by another consumer; acked untouched
    Skipped,
    /// Message could not be decoded; dead-lettered
    Rejected,
    /// Could not record progress or publish the result; message requeued
    Requeued,
}

enum TaskResult {
    Success(SuccessResult, Outcome),
    Error(ErrorResult),
}

/// Processes download requests taken off the input queue
#[derive(Builder)]
pub struct DownloadHandler {
    repository: Arc<dyn TaskRepository>,
    publisher: Arc<dyn Publisher>,
    downloader: Arc<dyn Downloader>,
    storage: StorageClient,
    #[builder(into)]
    tmp_dir: PathBuf,
    metrics: Arc<Metrics>,
    #[builder(skip)]
    tool_version: OnceLock<String>,
}

impl DownloadHandler {
    pub fn downloader(&self) -> &Arc<dyn Downloader> {
        &self.downloader
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    /// Version stamped on every task this handler touches
    pub fn set_tool_version(&self, version: String) {
        if self.tool_version.set(version).is_err() {
            debug!("Tool version already set");
        }
    }

    pub fn tool_version(&self) -> Option<&str> {
        self.tool_version.get().map(String::as_str)
    }

    /// Decode, claim, process and settle one input message
    ///
    /// Redelivery policy: a terminal task is acked and skipped; a PROCESSING
    /// task is skipped unless this delivery is a redelivery, in which case
    /// the previous consumer died mid-download and the work is redone.
    pub async fn on_input_message(&self, delivery: Delivery) -> Outcome {
        let task = match proto::decode::<DownloadRequest>(delivery.payload())
            .and_then(|request| request.to_task())
        {
            Ok(task) => task,
            Err(e) => {
                warn!(seq = delivery.seq(), error = %e, "Undecodable download request");
                log_settle_error(delivery.dead_letter(e.to_string()));
                return Outcome::Rejected;
            }
        };

        let claim = match self
            .repository
            .mark_processing(task.clone(), self.tool_version())
            .await
        {
            Ok(claim) => claim,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Cannot mark task processing");
                log_settle_error(delivery.nack(true));
                return Outcome::Requeued;
            }
        };

        match claim {
            Transition::Applied(_) => {}
            Transition::Unchanged(_) if delivery.redelivered() => {
                info!(task_id = %task.id, "Retrying task interrupted mid-download");
            }
            Transition::Unchanged(_) => {
                info!(task_id = %task.id, "Task already processing elsewhere, skipping");
                log_settle_error(delivery.ack());
                return Outcome::Skipped;
            }
            Transition::Rejected { task: current, .. } => {
                info!(task_id = %task.id, status = %current.status, "Task already finished, skipping");
                log_settle_error(delivery.ack());
                return Outcome::Skipped;
            }
        }

        let outcome = match self.process(&task).await {
            TaskResult::Success(result, outcome) => {
                self.publish(delivery, self.publisher.send_success(&result).await, outcome)
            }
            TaskResult::Error(result) => {
                warn!(task_id = %task.id, error = %result.message, "Download failed");
                self.publish(delivery, self.publisher.send_error(&result).await, Outcome::Failed)
            }
        };

        info!(task_id = %task.id, outcome = ?outcome, "Download request settled");
        outcome
    }

    fn publish(
        &self,
        delivery: Delivery,
        published: Result<(), MessagingError>,
        outcome: Outcome,
    ) -> Outcome {
        match published {
            Ok(()) => {
                log_settle_error(delivery.ack());
                outcome
            }
            Err(e) => {
                error!(seq = delivery.seq(), error = %e, "Result not published, requeueing request");
                log_settle_error(delivery.nack(true));
                Outcome::Requeued
            }
        }
    }

    async fn process(&self, task: &NewTask) -> TaskResult {
        match self.reusable_file(&task.url).await {
            Some(file) => {
                info!(task_id = %task.id, reused = %file.id, "Reusing previous download");
                TaskResult::Success(self.reused_result(task, &file).await, Outcome::Reused)
            }
            None => self.download(task).await,
        }
    }

    async fn reusable_file(&self, url: &str) -> Option<File> {
        let file = match self.repository.find_reusable_file(url).await {
            Ok(file) => file?,
            Err(e) => {
                warn!(url, error = %e, "Reuse lookup failed, downloading");
                return None;
            }
        };

        let key = file.storage_key.as_deref()?;
        match self.storage.exists(key).await {
            Ok(true) => Some(file),
            Ok(false) => None,
            Err(e) => {
                warn!(key, error = %e, "Stored artifact check failed, downloading");
                None
            }
        }
    }

    async fn reused_result(&self, task: &NewTask, file: &File) -> SuccessResult {
        let key = file.storage_key.clone().unwrap_or_default();
        let file_size = match self.storage.size(&key).await {
            Ok(size) => i64::try_from(size).unwrap_or(i64::MAX),
            Err(_) => 0,
        };

        let mut info = FileInfo::from_file(file);
        info.cache = Some(CacheInfo {
            cache_id: file.id.to_string(),
            cache_unique_id: key,
            file_size,
            date_timestamp: Some(proto::to_timestamp(file.created)),
        });

        SuccessResult {
            task_id: task.id.to_string(),
            file: Some(info),
            yt_dlp_version: self.tool_version().map(str::to_string),
        }
    }

    async fn download(&self, task: &NewTask) -> TaskResult {
        self.metrics.download_started();
        let workdir = self.tmp_dir.join(task.id.to_string());

        let result = match tokio::fs::create_dir_all(&workdir).await {
            Ok(()) => match self.downloader.download(&task.url, &workdir).await {
                Ok(media) => match self.upload(task, &media).await {
                    Ok(file) => Ok(file),
                    Err(e) => Err(("Upload failed", e)),
                },
                Err(e) => Err(("Download failed", e.to_string())),
            },
            Err(e) => Err(("Cannot create work directory", e.to_string())),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            debug!(workdir = %workdir.display(), error = %e, "Work directory not removed");
        }

        let yt_dlp_version = self.tool_version().map(str::to_string);
        match result {
            Ok(file) => TaskResult::Success(
                SuccessResult {
                    task_id: task.id.to_string(),
                    file: Some(file),
                    yt_dlp_version,
                },
                Outcome::Downloaded,
            ),
            Err((message, details)) => TaskResult::Error(ErrorResult {
                task_id: task.id.to_string(),
                message: message.to_string(),
                details: Some(details),
                yt_dlp_version,
            }),
        }
    }

    /// Push the media and its thumbnail under `{task_id}/`
    async fn upload(&self, task: &NewTask, media: &DownloadedMedia) -> Result<FileInfo, String> {
        let name = media
            .file_name()
            .ok_or_else(|| format!("no file name in {}", media.file.display()))?;
        let storage_key = format!("{}/{}", task.id, name);
        self.storage
            .upload_file(&storage_key, &media.file)
            .await
            .map_err(|e| e.to_string())?;

        let mut thumb_name = None;
        if let (Some(path), Some(thumb)) = (&media.thumbnail, media.thumb_name()) {
            match self
                .storage
                .upload_file(&format!("{}/{}", task.id, thumb), path)
                .await
            {
                Ok(_) => thumb_name = Some(thumb),
                Err(e) => warn!(task_id = %task.id, error = %e, "Thumbnail not uploaded"),
            }
        }

        Ok(FileInfo {
            title: media.title.clone(),
            name: Some(name),
            thumb_name,
            duration: media.duration,
            width: media.width,
            height: media.height,
            storage_key: Some(storage_key),
            meta_json: Some(media.info.to_string()),
            cache: None,
        })
    }
}

fn log_settle_error(result: Result<(), BrokerError>) {
    if let Err(e) = result {
        error!(error = %e, "Failed to settle delivery");
    }
}
