//! Fleet API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use scraperdash_core::Worker;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ListWorkersResponse {
    pub workers: Vec<Worker>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct WorkerErrorResponse {
    pub error: String,
}

/// List every worker that has sent a heartbeat, ordered by id
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<ListWorkersResponse> {
    let workers = state.orchestrator().list_workers();
    Json(ListWorkersResponse {
        count: workers.len(),
        workers,
    })
}

pub async fn get_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Worker>, (StatusCode, Json<WorkerErrorResponse>)> {
    state.orchestrator().fleet().get(&id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(WorkerErrorResponse {
                error: format!("worker not found: {}", id),
            }),
        )
    })
}
