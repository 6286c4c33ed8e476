//! Persisted task records and the task state machine.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// PENDING → PROCESSING → DONE | FAILED, skipping PROCESSING is allowed.
    /// Nothing leaves a terminal state and nothing returns to PENDING.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Processing) => true,
            (TaskStatus::Pending | TaskStatus::Processing, TaskStatus::Done | TaskStatus::Failed) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskSource {
    Api,
    Bot,
}

/// Reuse marker: set when a previous download of the same url was served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub cache_id: String,
    pub cache_unique_id: String,
    pub file_size: i64,
    pub date_timestamp: DateTime<Utc>,
}

/// Download artifact metadata, owned by exactly one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
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
    pub cache: Option<Cache>,
    /// Raw downloader metadata; only loaded on request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<File>,
}

/// Fields known when a task enters the system
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: Uuid,
    pub url: String,
    pub added_at: DateTime<Utc>,
    pub source: TaskSource,
    pub from_chat_id: Option<i64>,
    pub message_id: Option<i64>,
}

impl NewTask {
    pub(crate) fn into_task(self, status: TaskStatus, now: DateTime<Utc>) -> Task {
        Task {
            id: self.id,
            created: now,
            updated: now,
            added_at: self.added_at,
            status,
            url: self.url,
            source: self.source,
            from_chat_id: self.from_chat_id,
            message_id: self.message_id,
            yt_dlp_version: None,
            error: None,
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCache {
    pub cache_id: String,
    pub cache_unique_id: String,
    pub file_size: i64,
    pub date_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewFile {
    pub title: Option<String>,
    pub name: Option<String>,
    pub thumb_name: Option<String>,
    pub duration: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage_key: Option<String>,
    pub meta: Option<Value>,
    pub cache: Option<NewCache>,
}

impl NewFile {
    /// Split into the stored file record and its metadata blob
    pub(crate) fn into_file(self, now: DateTime<Utc>) -> (File, Option<Value>) {
        let cache = self.cache.map(|c| Cache {
            id: Uuid::now_v7(),
            created: now,
            updated: now,
            cache_id: c.cache_id,
            cache_unique_id: c.cache_unique_id,
            file_size: c.file_size,
            date_timestamp: c.date_timestamp,
        });

        let file = File {
            id: Uuid::now_v7(),
            created: now,
            updated: now,
            title: self.title,
            name: self.name,
            thumb_name: self.thumb_name,
            duration: self.duration,
            width: self.width,
            height: self.height,
            storage_key: self.storage_key,
            cache,
            meta: None,
        };

        (file, self.meta)
    }
}

/// Outcome of a status change request
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The task moved to the requested status
    Applied(Task),
    /// The task already had the requested status; nothing was written
    Unchanged(Task),
    /// The state machine forbids the move (e.g. out of a terminal state)
    Rejected { task: Task, requested: TaskStatus },
}

impl Transition {
    pub fn task(&self) -> &Task {
        match self {
            Transition::Applied(task) | Transition::Unchanged(task) => task,
            Transition::Rejected { task, .. } => task,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub unique_urls: u64,
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub done: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolVersion {
    pub tool: String,
    pub version: String,
    pub updated: DateTime<Utc>,
}

/// Filter and paging for task listings (newest first)
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct TaskQuery {
    /// Empty means every status
    #[builder(default)]
    pub statuses: Vec<TaskStatus>,
    #[builder(default = DEFAULT_LIST_LIMIT)]
    pub limit: usize,
    #[builder(default)]
    pub offset: usize,
}

impl TaskQuery {
    pub fn matches(&self, status: TaskStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_LIST_LIMIT)
    }
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
        for terminal in [Done, Failed] {
            for next in [Pending, Processing, Done, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert_eq!(" DONE ".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_upper_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Processing).unwrap(), "\"PROCESSING\"");
        assert_eq!(serde_json::to_string(&TaskSource::Bot).unwrap(), "\"BOT\"");
    }

    #[test]
    fn test_query_defaults_and_clamp() {
        let query = TaskQuery::default();
        assert_eq!(query.limit, DEFAULT_LIST_LIMIT);
        assert_eq!(query.offset, 0);
        assert!(query.matches(TaskStatus::Failed));

        let query = TaskQuery::builder()
            .statuses(vec![TaskStatus::Done])
            .limit(5000)
            .build();
        assert_eq!(query.effective_limit(), MAX_LIST_LIMIT);
        assert!(!query.matches(TaskStatus::Pending));
    }
}
