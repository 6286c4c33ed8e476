//! Fjall-based persistence for tasks, download artifacts and tool versions
//!
//! The ledger is the system's record of every download task:
//!
//! - Task rows (status, url, source, error, tool version)
//! - File rows (artifact metadata and an optional cache/reuse marker)
//! - File metadata blobs, kept apart so lightweight reads never touch them
//! - Downloader tool versions recorded by workers at startup
//!
//! Callers depend on the [`TaskRepository`] trait; [`FjallStore`] is the
//! embedded implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vidbox::ledger::{FjallStore, TaskRepository};
//!
//! let store = FjallStore::open("data/ledger")?;
//! let task = store.get_task(task_id, false).await?;
//! ```

pub mod error;
pub mod models;
pub mod partitions;
pub mod repository;
pub mod store;

pub use error::{LedgerError, Result};
pub use models::{
    Cache, File, NewCache, NewFile, NewTask, Task, TaskQuery, TaskSource, TaskStats, TaskStatus,
    ToolVersion, Transition, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT,
};
pub use repository::TaskRepository;
pub use store::FjallStore;
