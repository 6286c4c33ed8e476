use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handler::DownloadHandler;
use super::ytdlp::DownloadError;
use crate::ledger::LedgerError;
use crate::queue::{Broker, BrokerError, Channel, Consumer};

const TOOL_NAME: &str = "yt-dlp";

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("launcher already started")]
    AlreadyStarted,

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("cannot determine downloader version: {0}")]
    ToolVersion(#[from] DownloadError),

    #[error("cannot record downloader version: {0}")]
    Repository(#[from] LedgerError),
}

/// Connects one download worker to the input queue
///
/// `start` opens a channel with a prefetch window of `prefetch` deliveries and
/// records the downloader version concurrently; both must succeed before any
/// message is consumed. At most `prefetch` requests are processed at once.
pub struct WorkerLauncher {
    broker: Broker,
    queue: String,
    prefetch: u16,
    handler: Arc<DownloadHandler>,
    token: CancellationToken,
    channel: Option<Channel>,
    join: Option<JoinHandle<()>>,
}

impl WorkerLauncher {
    pub fn new(
        broker: Broker,
        queue: impl Into<String>,
        prefetch: u16,
        handler: Arc<DownloadHandler>,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            prefetch,
            handler,
            token: CancellationToken::new(),
            channel: None,
            join: None,
        }
    }

    pub async fn start(&mut self) -> Result<(), LauncherError> {
        if self.channel.is_some() {
            return Err(LauncherError::AlreadyStarted);
        }

        let (broker, version) = tokio::join!(self.setup_broker(), self.record_tool_version());
        let (channel, consumer) = broker?;
        version?;

        let join = tokio::spawn(consume(
            consumer,
            self.handler.clone(),
            self.token.clone(),
        ));

        info!(queue = %self.queue, prefetch = self.prefetch, "Download worker started");
        self.channel = Some(channel);
        self.join = Some(join);
        Ok(())
    }

    /// Stop consuming and close the channel
    ///
    /// Requests still being processed are abandoned and go back to the queue.
    pub async fn stop(&mut self) {
        self.token.cancel();

        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(queue = %self.queue, error = %e, "Consume loop ended abnormally");
            }
        }

        if let Some(channel) = &self.channel {
            if !channel.is_closed() {
                channel.close();
                info!(queue = %self.queue, "Download worker stopped");
            }
        }
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    /// Prefetch actually applied to the open channel
    pub fn channel_prefetch(&self) -> Option<u16> {
        self.channel.as_ref().and_then(Channel::prefetch)
    }

    /// Deliveries held and not yet settled
    pub fn in_flight(&self) -> usize {
        self.channel
            .as_ref()
            .and_then(Channel::available_slots)
            .map_or(0, |free| usize::from(self.prefetch).saturating_sub(free))
    }

    async fn setup_broker(&self) -> Result<(Channel, Consumer), LauncherError> {
        let mut channel = self.broker.channel();
        channel.set_qos(self.prefetch)?;
        let consumer = channel.consume(&self.queue)?;
        Ok((channel, consumer))
    }

    async fn record_tool_version(&self) -> Result<(), LauncherError> {
        let version = self.handler.downloader().version().await?;
        self.handler
            .repository()
            .create_or_update_tool_version(TOOL_NAME, &version)
            .await?;
        info!(tool = TOOL_NAME, version = %version, "Downloader version recorded");
        self.handler.set_tool_version(version);
        Ok(())
    }
}

async fn consume(mut consumer: Consumer, handler: Arc<DownloadHandler>, token: CancellationToken) {
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Download handler panicked");
                }
            }
            delivery = consumer.next() => match delivery {
                Some(delivery) => {
                    let handler = handler.clone();
                    inflight.spawn(async move { handler.on_input_message(delivery).await });
                }
                None => {
                    warn!(queue = consumer.queue(), "Input consumer closed");
                    break;
                }
            },
        }
    }

    if !inflight.is_empty() {
        info!(count = inflight.len(), "Abandoning in-flight downloads");
    }
    inflight.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::ledger::{FjallStore, NewTask, TaskRepository, TaskSource};
    use crate::messaging::MockPublisher;
    use crate::observability::Metrics;
    use crate::proto::DownloadRequest;
    use crate::queue::FjallQueue;
    use crate::storage::StorageClient;
    use crate::worker::ytdlp::{DownloadedMedia, Downloader};
    use async_trait::async_trait;
    use chrono::Utc;
    use prost::Message;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    const INPUT: &str = "download.requests";

    /// Blocks every download until released, tracking concurrency
    struct GatedDownloader {
        version_fails: bool,
        gate: Semaphore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedDownloader {
        fn new(version_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                version_fails,
                gate: Semaphore::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Downloader for GatedDownloader {
        async fn version(&self) -> crate::worker::ytdlp::Result<String> {
            if self.version_fails {
                return Err(DownloadError::Output("empty version".to_string()));
            }
            Ok("2024.10.07".to_string())
        }

        async fn download(
            &self,
            _url: &str,
            workdir: &Path,
        ) -> crate::worker::ytdlp::Result<DownloadedMedia> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let file = workdir.join("clip.mp4");
            tokio::fs::write(&file, b"video").await?;
            Ok(DownloadedMedia {
                title: None,
                file,
                thumbnail: None,
                duration: None,
                width: None,
                height: None,
                info: serde_json::json!({}),
            })
        }
    }

    struct Fixture {
        broker: Broker,
        store: Arc<FjallStore>,
        publisher: Arc<MockPublisher>,
        downloader: Arc<GatedDownloader>,
        handler: Arc<DownloadHandler>,
        _temp: TempDir,
    }

    fn fixture(version_fails: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FjallStore::open(temp.path().join("tasks")).unwrap());
        let queue = Arc::new(FjallQueue::open(temp.path().join("queue")).unwrap());
        let broker = Broker::open(queue, &BrokerConfig::default().queues()).unwrap();
        let publisher = Arc::new(MockPublisher::new());
        let downloader = GatedDownloader::new(version_fails);

        let handler = Arc::new(
            DownloadHandler::builder()
                .repository(store.clone())
                .publisher(publisher.clone())
                .downloader(downloader.clone())
                .storage(StorageClient::in_memory())
                .tmp_dir(temp.path().join("work"))
                .metrics(Arc::new(Metrics::new()))
                .build(),
        );

        Fixture {
            broker,
            store,
            publisher,
            downloader,
            handler,
            _temp: temp,
        }
    }

    fn publish_request(broker: &Broker) {
        let task = NewTask {
            id: Uuid::now_v7(),
            url: "https://example.com/v".to_string(),
            added_at: Utc::now(),
            source: TaskSource::Api,
            from_chat_id: None,
            message_id: None,
        };
        broker
            .publish(INPUT, DownloadRequest::from_task(&task).encode_to_vec())
            .unwrap();
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_start_applies_qos_and_records_version() {
        let fx = fixture(false);
        let mut launcher = WorkerLauncher::new(fx.broker.clone(), INPUT, 3, fx.handler.clone());

        launcher.start().await.unwrap();
        assert_eq!(launcher.prefetch(), 3);
        assert_eq!(launcher.channel_prefetch(), Some(3));
        assert_eq!(fx.handler.tool_version(), Some("2024.10.07"));

        let recorded = fx.store.tool_version("yt-dlp").await.unwrap().unwrap();
        assert_eq!(recorded.version, "2024.10.07");

        assert!(matches!(
            launcher.start().await,
            Err(LauncherError::AlreadyStarted)
        ));
        launcher.stop().await;
    }

    #[tokio::test]
    async fn test_version_failure_is_fatal() {
        let fx = fixture(true);
        let mut launcher = WorkerLauncher::new(fx.broker.clone(), INPUT, 1, fx.handler.clone());

        let result = launcher.start().await;
        assert!(matches!(result, Err(LauncherError::ToolVersion(_))));
        assert_eq!(launcher.channel_prefetch(), None);
    }

    #[tokio::test]
    async fn test_prefetch_bounds_concurrent_downloads() {
        let fx = fixture(false);
        let mut launcher = WorkerLauncher::new(fx.broker.clone(), INPUT, 2, fx.handler.clone());
        launcher.start().await.unwrap();

        for _ in 0..4 {
            publish_request(&fx.broker);
        }

        wait_until(|| fx.downloader.active.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.downloader.peak.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.in_flight(), 2);

        fx.downloader.gate.add_permits(4);
        wait_until(|| fx.publisher.successes().len() == 4).await;
        assert_eq!(fx.downloader.peak.load(Ordering::SeqCst), 2);
        assert_eq!(fx.broker.depth(INPUT).unwrap(), 0);

        launcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_returns_unfinished_work_to_queue() {
        let fx = fixture(false);
        let mut launcher = WorkerLauncher::new(fx.broker.clone(), INPUT, 1, fx.handler.clone());
        launcher.start().await.unwrap();

        publish_request(&fx.broker);
        wait_until(|| fx.downloader.active.load(Ordering::SeqCst) == 1).await;

        launcher.stop().await;
        launcher.stop().await;

        assert!(fx.publisher.successes().is_empty());
        assert_eq!(fx.broker.depth(INPUT).unwrap(), 1);

        // A fresh launcher picks the request up again
        let mut next = WorkerLauncher::new(fx.broker.clone(), INPUT, 1, fx.handler.clone());
        next.start().await.unwrap();
        fx.downloader.gate.add_permits(1);
        wait_until(|| fx.publisher.successes().len() == 1).await;
        next.stop().await;
    }
}
