use async_trait::async_trait;
use uuid::Uuid;

use super::error::Result;
use super::models::{File, NewFile, NewTask, Task, TaskQuery, TaskStats, ToolVersion, Transition};

/// Persistence capability shared by the API, result workers and download workers
///
/// Status changes go through `mark_processing` / `complete_task` /
/// `fail_task`, which enforce the one-directional task state machine and are
/// safe to repeat for the same task id.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a PENDING task unless a row with this id already exists
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    async fn get_task(&self, id: Uuid, include_meta: bool) -> Result<Option<Task>>;

    async fn get_latest_task(&self, include_meta: bool) -> Result<Option<Task>>;

    async fn list_tasks(&self, query: &TaskQuery, include_meta: bool) -> Result<Vec<Task>>;

    /// Remove a task with its file and metadata; false if it did not exist
    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    async fn get_stats(&self) -> Result<TaskStats>;

    async fn create_or_update_tool_version(&self, tool: &str, version: &str) -> Result<ToolVersion>;

    async fn tool_version(&self, tool: &str) -> Result<Option<ToolVersion>>;

    /// Worker accepted the request; creates the row if the worker got there first
    async fn mark_processing(&self, task: NewTask, tool_version: Option<&str>) -> Result<Transition>;

    async fn complete_task(
        &self,
        id: Uuid,
        file: NewFile,
        tool_version: Option<&str>,
    ) -> Result<Transition>;

    async fn fail_task(&self, id: Uuid, error: &str, tool_version: Option<&str>) -> Result<Transition>;

    /// File of the newest DONE task for `url` that has a stored artifact
    async fn find_reusable_file(&self, url: &str) -> Result<Option<File>>;
}
