use thiserror::Error;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::messaging::MessagingError;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    /// The broker did not accept the download request; no task was stored
    #[error("task could not be queued: {0}")]
    TaskCreation(#[source] MessagingError),

    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, TaskServiceError>;
