use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Task store error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Corrupt task record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A result or status change named a task that was never stored
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Invalid task key: {0}")]
    InvalidKey(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
