//! Request and response bodies of the HTTP surface
//!
//! Task payloads themselves are the projections from
//! [`services::schemas`](crate::services::schemas); this module only holds
//! query strings and envelope types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::ApiError;
use crate::ledger::{TaskQuery, TaskStatus, DEFAULT_LIST_LIMIT};
use crate::observability::MetricsSnapshot;

#[derive(Debug, Default, Deserialize)]
pub struct IncludeMetaQuery {
    #[serde(default)]
    pub include_meta: bool,
}

/// `GET /v1/tasks?include_meta&status=PENDING,DONE&limit&offset`
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub include_meta: bool,
    /// Comma separated statuses
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListTasksQuery {
    pub fn to_task_query(&self) -> Result<TaskQuery, ApiError> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<TaskStatus>().map_err(ApiError::InvalidPayload))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(TaskQuery::builder()
            .statuses(statuses)
            .limit(self.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .offset(self.offset.unwrap_or(0))
            .build())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
