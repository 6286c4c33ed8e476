//! Request and response shapes of the task service
//!
//! Reads come in two projections: [`TaskSimple`] leaves out the downloader
//! metadata blob, [`TaskFull`] carries it on the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ledger::{Cache, File, Task, TaskSource, TaskStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskIn {
    pub url: String,
}

/// Task submitted from the chat-bot surface
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBotTaskIn {
    pub url: String,
    pub from_chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskOut {
    pub id: Uuid,
    pub url: String,
    pub source: TaskSource,
    pub added_at: DateTime<Utc>,
}

/// A response shape built from a stored task
pub trait TaskProjection: Serialize + Send + Sized + 'static {
    /// Whether the metadata blob must be loaded for this shape
    const INCLUDE_META: bool;

    fn from_task(task: Task) -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheView {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub cache_id: String,
    pub cache_unique_id: String,
    pub file_size: i64,
    pub date_timestamp: DateTime<Utc>,
}

impl From<Cache> for CacheView {
    fn from(cache: Cache) -> Self {
        Self {
            id: cache.id,
            created: cache.created,
            updated: cache.updated,
            cache_id: cache.cache_id,
            cache_unique_id: cache.cache_unique_id,
            file_size: cache.file_size,
            date_timestamp: cache.date_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSimple {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub thumb_name: Option<String>,
    pub duration: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage_key: Option<String>,
    pub cache: Option<CacheView>,
}

impl From<File> for FileSimple {
    fn from(file: File) -> Self {
        Self {
            id: file.id,
            created: file.created,
            updated: file.updated,
            title: file.title,
            name: file.name,
            thumb_name: file.thumb_name,
            duration: file.duration,
            width: file.width,
            height: file.height,
            storage_key: file.storage_key,
            cache: file.cache.map(CacheView::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFull {
    #[serde(flatten)]
    pub file: FileSimple,
    pub meta: Option<Value>,
}

impl From<File> for FileFull {
    fn from(mut file: File) -> Self {
        let meta = file.meta.take();
        Self {
            file: FileSimple::from(file),
            meta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSimple {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub url: String,
    pub source: TaskSource,
    pub from_chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub yt_dlp_version: Option<String>,
    pub error: Option<String>,
    pub file: Option<FileSimple>,
}

impl TaskProjection for TaskSimple {
    const INCLUDE_META: bool = false;

    fn from_task(task: Task) -> Self {
        Self {
            id: task.id,
            created: task.created,
            updated: task.updated,
            added_at: task.added_at,
            status: task.status,
            url: task.url,
            source: task.source,
            from_chat_id: task.from_chat_id,
            message_id: task.message_id,
            yt_dlp_version: task.yt_dlp_version,
            error: task.error,
            file: task.file.map(FileSimple::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFull {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub url: String,
    pub source: TaskSource,
    pub from_chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub yt_dlp_version: Option<String>,
    pub error: Option<String>,
    pub file: Option<FileFull>,
}

impl TaskProjection for TaskFull {
    const INCLUDE_META: bool = true;

    fn from_task(task: Task) -> Self {
        Self {
            id: task.id,
            created: task.created,
            updated: task.updated,
            added_at: task.added_at,
            status: task.status,
            url: task.url,
            source: task.source,
            from_chat_id: task.from_chat_id,
            message_id: task.message_id,
            yt_dlp_version: task.yt_dlp_version,
            error: task.error,
            file: task.file.map(FileFull::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn done_task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            created: now,
            updated: now,
            added_at: now,
            status: TaskStatus::Done,
            url: "https://example.com/v".to_string(),
            source: TaskSource::Api,
            from_chat_id: None,
            message_id: None,
            yt_dlp_version: Some("2024.10.07".to_string()),
            error: None,
            file: Some(File {
                id: Uuid::now_v7(),
                created: now,
                updated: now,
                title: Some("Clip".to_string()),
                name: Some("clip.mp4".to_string()),
                thumb_name: None,
                duration: Some(12.5),
                width: Some(1280),
                height: Some(720),
                storage_key: Some("t/clip.mp4".to_string()),
                cache: None,
                meta: Some(json!({"extractor": "generic"})),
            }),
        }
    }

    #[test]
    fn test_simple_projection_drops_meta() {
        let value = serde_json::to_value(TaskSimple::from_task(done_task())).unwrap();
        assert_eq!(value["status"], "DONE");
        assert_eq!(value["file"]["name"], "clip.mp4");
        assert!(value["file"].get("meta").is_none());
    }

    #[test]
    fn test_full_projection_flattens_file() {
        let value = serde_json::to_value(TaskFull::from_task(done_task())).unwrap();
        assert_eq!(value["file"]["name"], "clip.mp4");
        assert_eq!(value["file"]["meta"]["extractor"], "generic");
    }
}
