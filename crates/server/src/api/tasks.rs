//! Task API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use scraperdash_core::{OrchestratorError, Task, TaskDescriptor, TaskFilter, TaskState, TaskType};

use crate::state::AppState;

/// Maximum allowed limit for task queries
const MAX_LIMIT: usize = 1000;

/// Default limit for task queries
const DEFAULT_LIMIT: usize = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    /// Filter by lifecycle state
    pub state: Option<String>,
    /// Filter by task type
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<Task>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelTaskResponse {
    pub cancelled: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TaskErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<TaskErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(TaskErrorResponse {
            error: error.into(),
        }),
    )
}

impl From<OrchestratorError> for TaskErrorResponse {
    fn from(e: OrchestratorError) -> Self {
        Self {
            error: e.to_string(),
        }
    }
}

fn orchestrator_error(e: OrchestratorError) -> ApiError {
    let status = match &e {
        OrchestratorError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            error!("Task API error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(e.into()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a task descriptor for planning and execution
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<TaskDescriptor>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    if descriptor.title.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "title must not be empty"));
    }

    let id = state
        .orchestrator()
        .submit_task(descriptor)
        .await
        .map_err(orchestrator_error)?;

    info!(task_id = %id, "Task submitted via API");
    Ok((StatusCode::CREATED, Json(SubmitTaskResponse { id })))
}

/// List tasks with optional filters
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let mut filter = TaskFilter::new().with_limit(limit).with_offset(offset);

    if let Some(raw) = params.state.as_deref() {
        let task_state: TaskState = raw
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_state(task_state);
    }

    if let Some(raw) = params.task_type {
        let task_type: TaskType = serde_json::from_value(Value::String(raw))
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        filter = filter.with_type(task_type);
    }

    let tasks = state
        .orchestrator()
        .query_tasks(&filter)
        .map_err(orchestrator_error)?;

    Ok(Json(ListTasksResponse {
        count: tasks.len(),
        tasks,
        limit,
        offset,
    }))
}

/// Get a single task by id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    match state.orchestrator().get_task(&id) {
        Ok(Some(task)) => Ok(Json(task)),
        Ok(None) => Err(orchestrator_error(OrchestratorError::TaskNotFound(id))),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Cancel a task; `cancelled: false` when it had already finished
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelTaskResponse>, ApiError> {
    let cancelled = state
        .orchestrator()
        .cancel_task(&id)
        .map_err(orchestrator_error)?;

    if cancelled {
        info!(task_id = %id, "Task cancelled via API");
    }

    Ok(Json(CancelTaskResponse { cancelled }))
}
