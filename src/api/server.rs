use std::future::Future;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};
use tracing::info;

use super::{
    services::{create_task, delete_task, get_latest_task, get_stats, get_task, health, list_tasks},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/tasks", get(list_tasks).post(create_task))
        .route("/v1/tasks/latest", get(get_latest_task))
        .route("/v1/tasks/stats", get(get_stats))
        .route("/v1/tasks/{id}", get(get_task).delete(delete_task))
        .route("/health", get(health))
        .with_state(state)
        // gzip/deflate/brotli request bodies are decompressed before handlers
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!(%address, "vidbox API listening");
    }

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
