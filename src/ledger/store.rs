use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::models::{
    File, NewFile, NewTask, Task, TaskQuery, TaskStats, TaskStatus, ToolVersion, Transition,
};
use super::partitions::{
    decode_task_key, encode_file_key, encode_meta_key, encode_task_key, encode_tool_key,
    TASK_PREFIX,
};
use super::repository::TaskRepository;

/// Fjall-backed persistent storage for tasks, files and tool versions
///
/// Reads go straight to the partitions. Every read-modify-write runs under
/// one process-wide write lock so the status checks and the write they guard
/// cannot interleave between the API, result workers and download workers.
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    files: PartitionHandle,
    file_meta: PartitionHandle,
    tool_versions: PartitionHandle,
    write_lock: Arc<Mutex<()>>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let file_meta = keyspace.open_partition("file_meta", PartitionCreateOptions::default())?;
        let tool_versions =
            keyspace.open_partition("tool_versions", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            tasks,
            files,
            file_meta,
            tool_versions,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        let _ = self.tool_versions.get(encode_tool_key("health"))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn load(&self, id: &Uuid) -> Result<Option<Task>> {
        match self.tasks.get(encode_task_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn put(&self, task: &Task) -> Result<()> {
        self.tasks
            .insert(encode_task_key(&task.id), serde_json::to_vec(task)?)?;
        Ok(())
    }

    fn load_file(&self, task_id: &Uuid, include_meta: bool) -> Result<Option<File>> {
        let Some(value) = self.files.get(encode_file_key(task_id))? else {
            return Ok(None);
        };

        let mut file: File = serde_json::from_slice(&value)?;
        if include_meta {
            if let Some(meta) = self.file_meta.get(encode_meta_key(task_id))? {
                file.meta = Some(serde_json::from_slice(&meta)?);
            }
        }
        Ok(Some(file))
    }

    fn with_file(&self, mut task: Task, include_meta: bool) -> Result<Task> {
        task.file = self.load_file(&task.id, include_meta)?;
        Ok(task)
    }

    /// Newest-first scan over task records (without files)
    fn scan_newest_first(&self) -> impl Iterator<Item = Result<Task>> + '_ {
        self.tasks.prefix(TASK_PREFIX).rev().map(|item| -> Result<Task> {
            let (key, value) = item?;
            if decode_task_key(&key).is_none() {
                return Err(LedgerError::InvalidKey(String::from_utf8_lossy(&key).into_owned()));
            }
            Ok(serde_json::from_slice(&value)?)
        })
    }

    /// Move a task into a terminal status; task and file land in one batch
    fn finish(
        &self,
        id: Uuid,
        requested: TaskStatus,
        tool_version: Option<&str>,
        error: Option<&str>,
        file: Option<NewFile>,
    ) -> Result<Transition> {
        let _guard = self.lock()?;

        let task = self.load(&id)?.ok_or(LedgerError::TaskNotFound(id))?;
        let mut task = match gate(task, requested) {
            Ok(task) => task,
            Err(outcome) => return Ok(outcome),
        };

        let now = Utc::now();
        task.status = requested;
        task.updated = now;
        task.error = error.map(str::to_string);
        if let Some(version) = tool_version {
            task.yt_dlp_version = Some(version.to_string());
        }

        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, encode_task_key(&id), serde_json::to_vec(&task)?);

        if let Some(file) = file {
            let (mut file, meta) = file.into_file(now);
            batch.insert(&self.files, encode_file_key(&id), serde_json::to_vec(&file)?);
            if let Some(meta) = &meta {
                batch.insert(&self.file_meta, encode_meta_key(&id), serde_json::to_vec(meta)?);
            }
            file.meta = meta;
            task.file = Some(file);
        }

        batch.commit()?;
        info!(task_id = %id, status = %requested, "Task finished");

        Ok(Transition::Applied(task))
    }
}

/// Pass the task through if `requested` is a legal next status
fn gate(task: Task, requested: TaskStatus) -> std::result::Result<Task, Transition> {
    if task.status == requested {
        return Err(Transition::Unchanged(task));
    }
    if !task.status.can_transition_to(requested) {
        debug!(task_id = %task.id, from = %task.status, to = %requested, "Transition rejected");
        return Err(Transition::Rejected { task, requested });
    }
    Ok(task)
}

#[async_trait]
impl TaskRepository for FjallStore {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let _guard = self.lock()?;

        if let Some(existing) = self.load(&task.id)? {
            debug!(task_id = %task.id, status = %existing.status, "Task already exists");
            return Ok(existing);
        }

        let task = task.into_task(TaskStatus::Pending, Utc::now());
        self.put(&task)?;
        info!(task_id = %task.id, url = %task.url, "Task created");
        Ok(task)
    }

    async fn get_task(&self, id: Uuid, include_meta: bool) -> Result<Option<Task>> {
        match self.load(&id)? {
            Some(task) => Ok(Some(self.with_file(task, include_meta)?)),
            None => Ok(None),
        }
    }

    async fn get_latest_task(&self, include_meta: bool) -> Result<Option<Task>> {
        match self.scan_newest_first().next() {
            Some(task) => Ok(Some(self.with_file(task?, include_meta)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, query: &TaskQuery, include_meta: bool) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut skipped = 0;
        let limit = query.effective_limit();

        for task in self.scan_newest_first() {
            if tasks.len() >= limit {
                break;
            }
            let task = task?;
            if !query.matches(task.status) {
                continue;
            }
            if skipped < query.offset {
                skipped += 1;
                continue;
            }
            tasks.push(self.with_file(task, include_meta)?);
        }

        Ok(tasks)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let _guard = self.lock()?;

        if self.load(&id)?.is_none() {
            return Ok(false);
        }

        let mut batch = self.keyspace.batch();
        batch.remove(&self.tasks, encode_task_key(&id));
        batch.remove(&self.files, encode_file_key(&id));
        batch.remove(&self.file_meta, encode_meta_key(&id));
        batch.commit()?;

        info!(task_id = %id, "Task deleted");
        Ok(true)
    }

    async fn get_stats(&self) -> Result<TaskStats> {
        let mut stats = TaskStats::default();
        let mut urls = HashSet::new();

        for task in self.scan_newest_first() {
            let task = task?;
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            urls.insert(task.url);
        }

        stats.unique_urls = urls.len() as u64;
        Ok(stats)
    }

    async fn create_or_update_tool_version(&self, tool: &str, version: &str) -> Result<ToolVersion> {
        let record = ToolVersion {
            tool: tool.to_string(),
            version: version.to_string(),
            updated: Utc::now(),
        };
        self.tool_versions
            .insert(encode_tool_key(tool), serde_json::to_vec(&record)?)?;
        info!(tool, version, "Tool version recorded");
        Ok(record)
    }

    async fn tool_version(&self, tool: &str) -> Result<Option<ToolVersion>> {
        match self.tool_versions.get(encode_tool_key(tool))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn mark_processing(&self, task: NewTask, tool_version: Option<&str>) -> Result<Transition> {
        let _guard = self.lock()?;
        let now = Utc::now();

        let Some(existing) = self.load(&task.id)? else {
            let mut task = task.into_task(TaskStatus::Processing, now);
            task.yt_dlp_version = tool_version.map(str::to_string);
            self.put(&task)?;
            info!(task_id = %task.id, "Task picked up before it was recorded");
            return Ok(Transition::Applied(task));
        };

        let mut task = match gate(existing, TaskStatus::Processing) {
            Ok(task) => task,
            Err(outcome) => return Ok(outcome),
        };

        task.status = TaskStatus::Processing;
        task.updated = now;
        if let Some(version) = tool_version {
            task.yt_dlp_version = Some(version.to_string());
        }
        self.put(&task)?;
        debug!(task_id = %task.id, "Task processing");

        Ok(Transition::Applied(task))
    }

    async fn complete_task(
        &self,
        id: Uuid,
        file: NewFile,
        tool_version: Option<&str>,
    ) -> Result<Transition> {
        self.finish(id, TaskStatus::Done, tool_version, None, Some(file))
    }

    async fn fail_task(&self, id: Uuid, error: &str, tool_version: Option<&str>) -> Result<Transition> {
        self.finish(id, TaskStatus::Failed, tool_version, Some(error), None)
    }

    async fn find_reusable_file(&self, url: &str) -> Result<Option<File>> {
        for task in self.scan_newest_first() {
            let task = task?;
            if task.url != url || task.status != TaskStatus::Done {
                continue;
            }
            if let Some(file) = self.load_file(&task.id, false)? {
                if file.storage_key.is_some() {
                    return Ok(Some(file));
                }
            }
        }
        Ok(None)
    }
}
