//! Publishing download requests and results
//!
//! The front-end only needs [`Publisher::send_for_download`]; workers use the
//! result methods. [`BrokerPublisher`] routes to the queues named in
//! [`BrokerConfig`].

use async_trait::async_trait;
use prost::Message;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::config::BrokerConfig;
use crate::proto::{DownloadRequest, ErrorResult, SuccessResult};
use crate::queue::{Broker, BrokerError};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Sends messages to the broker; success means the broker accepted the
/// message, nothing more
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send_for_download(&self, request: &DownloadRequest) -> Result<()>;

    async fn send_success(&self, result: &SuccessResult) -> Result<()>;

    async fn send_error(&self, result: &ErrorResult) -> Result<()>;

    /// Health check
    async fn health(&self) -> bool;
}

#[derive(Clone)]
pub struct BrokerPublisher {
    broker: Broker,
    queues: BrokerConfig,
}

impl BrokerPublisher {
    pub fn new(broker: Broker, queues: BrokerConfig) -> Self {
        Self { broker, queues }
    }

    fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let size = payload.len();
        let seq = self.broker.publish(queue, payload)?;
        tracing::debug!(queue, seq, size, "Published");
        Ok(())
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    async fn send_for_download(&self, request: &DownloadRequest) -> Result<()> {
        self.publish(&self.queues.input_queue, request.encode_to_vec())
    }

    async fn send_success(&self, result: &SuccessResult) -> Result<()> {
        self.publish(&self.queues.success_queue, result.encode_to_vec())
    }

    async fn send_error(&self, result: &ErrorResult) -> Result<()> {
        self.publish(&self.queues.error_queue, result.encode_to_vec())
    }

    async fn health(&self) -> bool {
        self.broker.health_check()
    }
}

/// Records messages in memory; can be switched to reject every publish
#[derive(Debug, Default)]
pub struct MockPublisher {
    failing: AtomicBool,
    requests: Mutex<Vec<DownloadRequest>>,
    successes: Mutex<Vec<SuccessResult>>,
    errors: Mutex<Vec<ErrorResult>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn successes(&self) -> Vec<SuccessResult> {
        self.successes.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<ErrorResult> {
        self.errors.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record<T>(&self, sink: &Mutex<Vec<T>>, message: &T) -> Result<()>
    where
        T: Clone,
    {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MessagingError::PublishFailed("mock publisher is failing".to_string()));
        }
        sink.lock()
            .map_err(|_| MessagingError::PublishFailed("mock publisher poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn send_for_download(&self, request: &DownloadRequest) -> Result<()> {
        tracing::info!(task_id = %request.id, "Mock publish");
        self.record(&self.requests, request)
    }

    async fn send_success(&self, result: &SuccessResult) -> Result<()> {
        self.record(&self.successes, result)
    }

    async fn send_error(&self, result: &ErrorResult) -> Result<()> {
        self.record(&self.errors, result)
    }

    async fn health(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
