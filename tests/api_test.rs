use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use vidbox::api::{self, AppState};
use vidbox::config::Config;
use vidbox::ledger::{FjallStore, NewFile, TaskRepository, TaskStats, TaskStatus};
use vidbox::messaging::{MockPublisher, Publisher};
use vidbox::observability::Metrics;
use vidbox::queue::{Broker, FjallQueue};
use vidbox::services::{CreateTaskOut, TaskFull, TaskSimple};

fn create_test_config() -> Config {
    let config_toml = r#"
[server]
bind_addr = "127.0.0.1:8080"

[storage]
provider = "memory"
    "#;

    toml::from_str(config_toml).expect("Failed to parse test config")
}

struct TestApp {
    app: Router,
    store: Arc<FjallStore>,
    broker: Broker,
    _temp_dir: TempDir,
}

fn build_test_app() -> TestApp {
    build_app_with(None)
}

/// Builds an app with isolated stores; `publisher` replaces the broker publisher
fn build_app_with(publisher: Option<Arc<dyn Publisher>>) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config();

    let store = Arc::new(FjallStore::open(temp_dir.path().join("tasks")).unwrap());
    let queue = Arc::new(FjallQueue::open(temp_dir.path().join("queue")).unwrap());
    let broker = Broker::open(queue, &config.broker.queues()).unwrap();
    let metrics = Arc::new(Metrics::new());

    let state = match publisher {
        Some(publisher) => {
            AppState::with_publisher(config, store.clone(), broker.clone(), publisher, metrics)
        }
        None => AppState::new(config, store.clone(), broker.clone(), metrics),
    };

    TestApp {
        app: api::router(state),
        store,
        broker,
        _temp_dir: temp_dir,
    }
}

fn post_task_request(body: Value) -> Request<Body> {
    Request::builder()
        .uri("/v1/tasks")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create(app: &Router, url: &str) -> CreateTaskOut {
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), post_task_request(json!({"url": url})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_create_task_success() {
    let test = build_test_app();

    let created = create(&test.app, "https://example.com/watch?v=1").await;
    assert_eq!(created.url, "https://example.com/watch?v=1");

    let stored = test.store.get_task(created.id, false).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(test.broker.depth("download.requests").unwrap(), 1);
}

#[tokio::test]
async fn test_create_task_invalid_content_type() {
    let test = build_test_app();

    let request = Request::builder()
        .uri("/v1/tasks")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"url": "https://example.com/v"}"#))
        .unwrap();

    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_task_invalid_url() {
    let test = build_test_app();

    let response = ServiceExt::<Request<Body>>::oneshot(
        test.app.clone(),
        post_task_request(json!({"url": "ftp://example.com/v"})),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: Value = body_json(response).await;
    assert_eq!(error["code"], "INVALID_PAYLOAD");

    let response = test
        .app
        .oneshot(post_task_request(json!({"link": "https://example.com"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_task_publish_failure() {
    let publisher: Arc<dyn Publisher> = Arc::new(MockPublisher::failing());
    let test = build_app_with(Some(publisher));

    let response = ServiceExt::<Request<Body>>::oneshot(
        test.app.clone(),
        post_task_request(json!({"url": "https://example.com/v"})),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = body_json(response).await;
    assert_eq!(error["code"], "TASK_CREATION_FAILED");

    // No task row without an accepted request
    assert_eq!(test.store.get_stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_get_task_projections() {
    let test = build_test_app();
    let created = create(&test.app, "https://example.com/v").await;

    test.store
        .complete_task(
            created.id,
            NewFile {
                name: Some("v.mp4".to_string()),
                storage_key: Some(format!("{}/v.mp4", created.id)),
                meta: Some(json!({"format": "mp4"})),
                ..Default::default()
            },
            Some("2024.10.07"),
        )
        .await
        .unwrap();

    let response = ServiceExt::<Request<Body>>::oneshot(
        test.app.clone(),
        get_request(&format!("/v1/tasks/{}", created.id)),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let simple: Value = body_json(response).await;
    assert_eq!(simple["status"], "DONE");
    assert_eq!(simple["file"]["name"], "v.mp4");
    assert!(simple["file"].get("meta").is_none());

    let response = test
        .app
        .oneshot(get_request(&format!(
            "/v1/tasks/{}?include_meta=true",
            created.id
        )))
        .await
        .unwrap();
    let full: TaskFull = body_json(response).await;
    assert_eq!(full.file.unwrap().meta, Some(json!({"format": "mp4"})));
}

#[tokio::test]
async fn test_get_task_not_found() {
    let test = build_test_app();

    let response = ServiceExt::<Request<Body>>::oneshot(
        test.app.clone(),
        get_request(&format!("/v1/tasks/{}", uuid::Uuid::now_v7())),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = test
        .app
        .oneshot(get_request("/v1/tasks/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_tasks_with_status_filter() {
    let test = build_test_app();
    let first = create(&test.app, "https://example.com/a").await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = create(&test.app, "https://example.com/b").await;
    test.store.fail_task(first.id, "boom", None).await.unwrap();

    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), get_request("/v1/tasks"))
        .await
        .unwrap();
    let all: Vec<TaskSimple> = body_json(response).await;
    assert_eq!(
        all.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );

    let response = ServiceExt::<Request<Body>>::oneshot(
        test.app.clone(),
        get_request("/v1/tasks?status=FAILED&limit=10"),
    )
    .await
    .unwrap();
    let failed: Vec<TaskSimple> = body_json(response).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error.as_deref(), Some("boom"));

    let response = test
        .app
        .oneshot(get_request("/v1/tasks?status=LOST"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_latest_and_stats() {
    let test = build_test_app();

    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), get_request("/v1/tasks/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    create(&test.app, "https://example.com/a").await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let newest = create(&test.app, "https://example.com/a").await;

    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), get_request("/v1/tasks/latest"))
        .await
        .unwrap();
    let latest: TaskSimple = body_json(response).await;
    assert_eq!(latest.id, newest.id);

    let response = test.app.oneshot(get_request("/v1/tasks/stats")).await.unwrap();
    let stats: TaskStats = body_json(response).await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.unique_urls, 1);
    assert_eq!(stats.pending, 2);
}

#[tokio::test]
async fn test_delete_task() {
    let test = build_test_app();
    let created = create(&test.app, "https://example.com/a").await;

    let delete = || {
        Request::builder()
            .uri(format!("/v1/tasks/{}", created.id))
            .method("DELETE")
            .body(Body::empty())
            .unwrap()
    };

    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), delete())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = test.app.oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = build_test_app();

    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), get_request("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: Value = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health.get("version").is_some());
    assert!(health["metrics"].get("tasks_created").is_some());

    let components = health["components"].as_object().unwrap();
    assert!(components.contains_key("api"));
    assert!(components.contains_key("store"));
    assert!(components.contains_key("broker"));

    test.broker.close();
    let response = test.app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
