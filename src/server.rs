use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use vidbox::api::{self, AppState};
use vidbox::config::Config;
use vidbox::ledger::FjallStore;
use vidbox::messaging::{BrokerPublisher, Publisher};
use vidbox::notify;
use vidbox::observability::Metrics;
use vidbox::queue::{Broker, FjallQueue};
use vidbox::storage::StorageClient;
use vidbox::worker::{DownloadHandler, Downloader, WorkerLauncher, YtDlpDownloader};
use vidbox::workers::{ErrorResultWorker, SuccessResultWorker, WorkerManager};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Run the API, result workers and download workers in one process
///
/// Shutdown order: HTTP, result workers (bounded by the grace period),
/// download workers, broker, then the task store is persisted.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let tasks_path = config.server.tasks_path();
    info!(path = %tasks_path.display(), "Opening task store");
    let store = Arc::new(
        FjallStore::open(&tasks_path).map_err(|e| format!("Failed to open task store: {}", e))?,
    );

    let queue_path = config.server.queue_path();
    info!(path = %queue_path.display(), "Opening broker queue");
    let queue = Arc::new(
        FjallQueue::open(&queue_path).map_err(|e| format!("Failed to open queue: {}", e))?,
    );
    let broker = Broker::open(queue, &config.broker.queues())?;

    let storage = StorageClient::from_config(&config.storage)?;
    let metrics = Arc::new(Metrics::new());
    let notifier = notify::from_config(&config.notifier)?;

    let mut manager = WorkerManager::new(broker.clone(), config.results.restart_backoff())
        .with_max_abandoned(config.results.max_abandoned);
    manager.register(Arc::new(SuccessResultWorker::new(
        config.broker.success_queue.clone(),
        store.clone(),
        notifier.clone(),
        metrics.clone(),
    )))?;
    manager.register(Arc::new(ErrorResultWorker::new(
        config.broker.error_queue.clone(),
        store.clone(),
        notifier,
        metrics.clone(),
    )))?;
    manager.start_workers();

    let publisher: Arc<dyn Publisher> =
        Arc::new(BrokerPublisher::new(broker.clone(), config.broker.clone()));
    let downloader: Arc<dyn Downloader> = Arc::new(YtDlpDownloader::new(&config.worker.ytdlp_bin));

    let mut launchers = Vec::with_capacity(config.worker.processes);
    for _ in 0..config.worker.processes {
        let handler = Arc::new(
            DownloadHandler::builder()
                .repository(store.clone())
                .publisher(publisher.clone())
                .downloader(downloader.clone())
                .storage(storage.clone())
                .tmp_dir(config.worker.tmp_dir.clone())
                .metrics(metrics.clone())
                .build(),
        );
        let mut launcher = WorkerLauncher::new(
            broker.clone(),
            config.broker.input_queue.clone(),
            config.worker.max_simultaneous_downloads,
            handler,
        );

        if let Err(e) = launcher.start().await {
            error!(error = %e, "Download worker failed to start");
            stop_all(&mut manager, &mut launchers, &config, &broker, &store).await;
            return Err(e.into());
        }
        launchers.push(launcher);
    }

    let listener = match TcpListener::bind(config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %config.server.bind_addr, error = %e, "Cannot bind HTTP listener");
            stop_all(&mut manager, &mut launchers, &config, &broker, &store).await;
            return Err(e.into());
        }
    };
    let state = AppState::with_publisher(
        config.clone(),
        store.clone(),
        broker.clone(),
        publisher,
        metrics,
    );

    let served = api::serve(listener, state, shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }

    stop_all(&mut manager, &mut launchers, &config, &broker, &store).await;
    served?;

    info!("vidbox stopped");
    Ok(())
}

async fn stop_all(
    manager: &mut WorkerManager,
    launchers: &mut [WorkerLauncher],
    config: &Config,
    broker: &Broker,
    store: &FjallStore,
) {
    manager.shutdown(config.results.shutdown_grace()).await;

    for launcher in launchers.iter_mut() {
        launcher.stop().await;
    }

    broker.close();
    if let Err(e) = broker.flush() {
        warn!(error = %e, "Broker flush failed");
    }
    if let Err(e) = store.persist() {
        warn!(error = %e, "Task store persist failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
