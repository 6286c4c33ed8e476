use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::proto::ProtoError;
use crate::queue::BrokerError;

/// Tag identifying one kind of result consumer
///
/// Open set: the built-in tags are [`WorkerType::SUCCESS`] and
/// [`WorkerType::ERROR`], other consumers bring their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerType(&'static str);

impl WorkerType {
    pub const SUCCESS: WorkerType = WorkerType("success");
    pub const ERROR: WorkerType = WorkerType("error");

    pub const fn new(tag: &'static str) -> Self {
        Self(tag)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("undecodable message: {0}")]
    Decode(#[from] ProtoError),

    #[error("result for unknown task {0}")]
    UnknownTask(Uuid),

    #[error("repository error: {0}")]
    Repository(LedgerError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl WorkerError {
    /// Retrying the same message can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, WorkerError::Decode(_) | WorkerError::UnknownTask(_))
    }
}

impl From<LedgerError> for WorkerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::TaskNotFound(id) => WorkerError::UnknownTask(id),
            other => WorkerError::Repository(other),
        }
    }
}

/// A long-running consumer that applies one kind of result message
#[async_trait]
pub trait ResultWorker: Send + Sync + 'static {
    fn worker_type(&self) -> WorkerType;

    /// Queue this worker consumes
    fn queue(&self) -> &str;

    /// Apply one message; must be safe to repeat for the same task
    async fn handle(&self, payload: &[u8]) -> Result<(), WorkerError>;
}
