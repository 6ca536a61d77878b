use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use scraperdash_core::{OrchestratorStatus, SanitizedConfig};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub orchestrator: OrchestratorStatus,
    pub simulator_running: bool,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        orchestrator: state.orchestrator().status(),
        simulator_running: state.simulator().is_some_and(|sim| sim.is_running()),
    })
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Handlers invoked for the message.
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct PublishErrorResponse {
    pub error: String,
}

/// Inject a message onto the bus on behalf of an external producer.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, (StatusCode, Json<PublishErrorResponse>)> {
    let topic = request.topic.trim();
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(PublishErrorResponse {
                error: format!("invalid publish topic: '{}'", request.topic),
            }),
        ));
    }

    let delivered = state.bus().publish(topic, request.payload);
    debug!(topic, delivered, "Published external message");

    Ok(Json(PublishResponse { delivered }))
}
