//! Tracing setup and in-process counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn default_directives(level: &str) -> String {
    format!("{},fjall=warn,lsm_tree=warn", level.to_ascii_lowercase())
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_created: AtomicU64,
    task_publish_failures: AtomicU64,
    task_insert_failures: AtomicU64,
    results_applied: AtomicU64,
    results_ignored: AtomicU64,
    downloads_started: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_created", "Metric incremented");
    }

    pub fn task_publish_failed(&self) {
        self.task_publish_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "task_publish_failures", "Metric incremented");
    }

    /// Request was queued but the PENDING row could not be written
    pub fn task_insert_failed(&self) {
        self.task_insert_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "task_insert_failures", "Metric incremented");
    }

    pub fn result_applied(&self) {
        self.results_applied.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "results_applied", "Metric incremented");
    }

    /// Result for a task that was already terminal (duplicate or late)
    pub fn result_ignored(&self) {
        self.results_ignored.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "results_ignored", "Metric incremented");
    }

    pub fn download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_started", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            task_publish_failures: self.task_publish_failures.load(Ordering::Relaxed),
            task_insert_failures: self.task_insert_failures.load(Ordering::Relaxed),
            results_applied: self.results_applied.load(Ordering::Relaxed),
            results_ignored: self.results_ignored.load(Ordering::Relaxed),
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_created: u64,
    pub task_publish_failures: u64,
    pub task_insert_failures: u64,
    pub results_applied: u64,
    pub results_ignored: u64,
    pub downloads_started: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.task_created();
        metrics.task_created();
        metrics.task_publish_failed();
        metrics.task_insert_failed();
        metrics.result_applied();
        metrics.result_ignored();
        metrics.download_started();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_created, 2);
        assert_eq!(snapshot.task_publish_failures, 1);
        assert_eq!(snapshot.task_insert_failures, 1);
        assert_eq!(snapshot.results_applied, 1);
        assert_eq!(snapshot.results_ignored, 1);
        assert_eq!(snapshot.downloads_started, 1);
    }

    #[test]
    fn test_default_directives_cap_storage_engine() {
        assert_eq!(default_directives("DEBUG"), "debug,fjall=warn,lsm_tree=warn");
    }
}
