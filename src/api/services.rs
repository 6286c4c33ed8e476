use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use uuid::Uuid;

use super::{
    error::ApiError,
    models::{HealthResponse, IncludeMetaQuery, ListTasksQuery},
    state::AppState,
    utils, validation,
};
use crate::services::{CreateTaskIn, TaskFull, TaskProjection, TaskSimple};

const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Queue a download (POST /v1/tasks)
///
/// The request is published to the input queue before the task row is
/// written; when the broker refuses it the client gets 503 and no task exists.
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    utils::require_json(&headers)?;

    let body_bytes = read_body(body).await?;
    let mut input: CreateTaskIn = serde_json::from_slice(&body_bytes)?;
    input.url = input.url.trim().to_string();
    validation::validate_url(&input.url).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let created = state.service.create_task(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Request body, already decompressed by the middleware
async fn read_body(body: axum::body::Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes()
        .to_vec();

    utils::validate_body_size(&data, MAX_PAYLOAD_SIZE)?;
    Ok(data)
}

/// GET /v1/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Response, ApiError> {
    let task_query = query.to_task_query()?;
    if query.include_meta {
        list::<TaskFull>(&state, &task_query).await
    } else {
        list::<TaskSimple>(&state, &task_query).await
    }
}

async fn list<P: TaskProjection>(
    state: &AppState,
    query: &crate::ledger::TaskQuery,
) -> Result<Response, ApiError> {
    let tasks = state.service.list_tasks::<P>(query).await?;
    Ok(Json(tasks).into_response())
}

/// GET /v1/tasks/latest
pub async fn get_latest_task(
    State(state): State<AppState>,
    Query(query): Query<IncludeMetaQuery>,
) -> Result<Response, ApiError> {
    if query.include_meta {
        latest::<TaskFull>(&state).await
    } else {
        latest::<TaskSimple>(&state).await
    }
}

async fn latest<P: TaskProjection>(state: &AppState) -> Result<Response, ApiError> {
    let task = state
        .service
        .get_latest_task::<P>()
        .await?
        .ok_or_else(|| ApiError::NotFound("no tasks yet".to_string()))?;
    Ok(Json(task).into_response())
}

/// GET /v1/tasks/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_stats().await?))
}

/// GET /v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<IncludeMetaQuery>,
) -> Result<Response, ApiError> {
    let id = parse_task_id(&id)?;
    let response = if query.include_meta {
        Json(state.service.get_task::<TaskFull>(id).await?).into_response()
    } else {
        Json(state.service.get_task::<TaskSimple>(id).await?).into_response()
    };
    Ok(response)
}

/// DELETE /v1/tasks/{id}
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_task_id(&id)?;
    state.service.delete_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidPayload(format!("invalid task id: {raw}")))
}

/// Health check endpoint (GET /health)
///
/// Reports the API, the task store and the broker; 503 when any of them is
/// unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    let verdict = |ok: bool| if ok { "healthy" } else { "unhealthy" }.to_string();
    components.insert("api".to_string(), verdict(true));
    components.insert("store".to_string(), verdict(state.store.health_check().is_ok()));
    components.insert("broker".to_string(), verdict(state.broker.health_check()));

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: verdict(all_healthy),
        components,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
