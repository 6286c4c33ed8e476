use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::consumer::run_worker;
use super::traits::{ResultWorker, WorkerType};
use crate::queue::Broker;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("worker type '{0}' is already registered")]
    DuplicateWorkerType(WorkerType),
}

/// Abandoned deliveries of one result before it is dead-lettered
pub const DEFAULT_MAX_ABANDONED: u32 = 3;

/// Running supervised consumer
#[derive(Debug)]
pub struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Runs exactly one supervised consumer per registered worker type
///
/// The registry is owned by the manager: handles are added by
/// [`start_workers`](Self::start_workers) and removed by
/// [`shutdown`](Self::shutdown).
pub struct WorkerManager {
    broker: Broker,
    restart_backoff: Duration,
    max_abandoned: u32,
    workers: Vec<Arc<dyn ResultWorker>>,
    registry: HashMap<WorkerType, WorkerHandle>,
}

impl WorkerManager {
    pub fn new(broker: Broker, restart_backoff: Duration) -> Self {
        Self {
            broker,
            restart_backoff,
            max_abandoned: DEFAULT_MAX_ABANDONED,
            workers: Vec::new(),
            registry: HashMap::new(),
        }
    }

    /// Dead-letter a result once its handler abandoned it this many times
    pub fn with_max_abandoned(mut self, max_abandoned: u32) -> Self {
        self.max_abandoned = max_abandoned.max(1);
        self
    }

    pub fn register(&mut self, worker: Arc<dyn ResultWorker>) -> Result<(), ManagerError> {
        let worker_type = worker.worker_type();
        if self.workers.iter().any(|w| w.worker_type() == worker_type) {
            return Err(ManagerError::DuplicateWorkerType(worker_type));
        }
        self.workers.push(worker);
        Ok(())
    }

    /// Spawn a supervisor for every registered worker that is not running yet
    pub fn start_workers(&mut self) {
        for worker in &self.workers {
            let worker_type = worker.worker_type();
            if self.registry.contains_key(&worker_type) {
                warn!(worker = %worker_type, "Worker already running");
                continue;
            }

            let token = CancellationToken::new();
            let join = tokio::spawn(supervise(
                worker.clone(),
                self.broker.clone(),
                token.clone(),
                self.restart_backoff,
                self.max_abandoned,
            ));
            self.registry.insert(worker_type, WorkerHandle { token, join });
        }

        info!(count = self.registry.len(), "Result workers started");
    }

    /// Request cancellation of every worker without waiting for it
    pub fn stop_workers(&self) {
        for (worker_type, handle) in &self.registry {
            if !handle.token.is_cancelled() {
                info!(worker = %worker_type, "Stopping result worker");
                handle.token.cancel();
            }
        }
    }

    /// Stop, wait up to `grace` for the workers to finish, then abort the rest
    pub async fn shutdown(&mut self, grace: Duration) {
        self.stop_workers();

        let deadline = tokio::time::Instant::now() + grace;
        for (worker_type, mut handle) in self.registry.drain() {
            match tokio::time::timeout_at(deadline, &mut handle.join).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(worker = %worker_type, "Result worker did not stop in time, aborting");
                    handle.join.abort();
                }
            }
        }

        info!("Result workers shut down");
    }

    /// Worker types with a registry entry, sorted
    pub fn worker_types(&self) -> Vec<WorkerType> {
        let mut types: Vec<WorkerType> = self.registry.keys().copied().collect();
        types.sort();
        types
    }

    pub fn handle(&self, worker_type: WorkerType) -> Option<&WorkerHandle> {
        self.registry.get(&worker_type)
    }
}

/// Keep one consumer loop alive until cancelled
///
/// Errors and panics of the loop are logged and the loop is restarted after
/// `backoff`. A panic drops the delivery being handled, which counts
/// towards `max_abandoned` for that message. The loop runs inside a [`JoinSet`] so aborting the supervisor
/// also aborts it.
async fn supervise(
    worker: Arc<dyn ResultWorker>,
    broker: Broker,
    token: CancellationToken,
    backoff: Duration,
    max_abandoned: u32,
) {
    let worker_type = worker.worker_type();
    info!(worker = %worker_type, queue = worker.queue(), "Result worker started");

    loop {
        let mut run = JoinSet::new();
        run.spawn(run_worker(
            worker.clone(),
            broker.clone(),
            token.clone(),
            max_abandoned,
        ));

        match run.join_next().await {
            Some(Ok(Ok(()))) | None => break,
            Some(Ok(Err(e))) => error!(worker = %worker_type, error = %e, "Result worker failed"),
            Some(Err(e)) if e.is_panic() => error!(worker = %worker_type, "Result worker panicked"),
            Some(Err(e)) => error!(worker = %worker_type, error = %e, "Result worker aborted"),
        }

        if broker.is_closed() {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        warn!(worker = %worker_type, "Restarting result worker");
    }

    info!(worker = %worker_type, "Result worker stopped");
}
