use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::traits::{ResultWorker, WorkerError};
use crate::ledger::Transition;
use crate::notify::Notifier;
use crate::observability::Metrics;
use crate::queue::Broker;

/// Consume the worker's queue until cancelled or the broker closes
///
/// Acks handled messages and dead-letters permanent failures. A transient
/// failure re-queues the message and ends the loop with the error so the
/// supervisor can restart it. A message that was abandoned mid-handle
/// `max_abandoned` times (its handler panicked) is dead-lettered unhandled.
pub async fn run_worker(
    worker: Arc<dyn ResultWorker>,
    broker: Broker,
    token: CancellationToken,
    max_abandoned: u32,
) -> Result<(), WorkerError> {
    let worker_type = worker.worker_type();
    let channel = broker.channel();
    let mut consumer = channel.consume(worker.queue())?;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = consumer.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        let seq = delivery.seq();

        if delivery.abandoned() >= max_abandoned {
            let abandoned = delivery.abandoned();
            error!(
                worker = %worker_type,
                seq,
                abandoned,
                "Dead-lettering result that keeps crashing its handler"
            );
            delivery.dead_letter(format!("handler abandoned it {abandoned} times"))?;
            continue;
        }

        match worker.handle(delivery.payload()).await {
            Ok(()) => {
                delivery.ack()?;
                debug!(worker = %worker_type, seq, "Result applied");
            }
            Err(e) if e.is_permanent() => {
                warn!(worker = %worker_type, seq, error = %e, "Dead-lettering result");
                delivery.dead_letter(e.to_string())?;
            }
            Err(e) => {
                error!(worker = %worker_type, seq, error = %e, "Result not applied, requeueing");
                delivery.nack(true)?;
                channel.close();
                return Err(e);
            }
        }
    }

    channel.close();
    Ok(())
}

/// Record a transition and notify when it changed the task
pub(crate) async fn settle(
    transition: Transition,
    notifier: &dyn Notifier,
    metrics: &Metrics,
) {
    match transition {
        Transition::Applied(task) => {
            metrics.result_applied();
            if let Err(e) = notifier.notify(&task).await {
                warn!(task_id = %task.id, error = %e, "Notification failed");
            }
        }
        Transition::Unchanged(task) => {
            metrics.result_ignored();
            debug!(task_id = %task.id, status = %task.status, "Duplicate result");
        }
        Transition::Rejected { task, requested } => {
            metrics.result_ignored();
            warn!(
                task_id = %task.id,
                status = %task.status,
                requested = %requested,
                "Result ignored for finished task"
            );
        }
    }
}
