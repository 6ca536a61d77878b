//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the dashboard server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Task and worker counts (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use scraperdash_core::{TaskState, WorkerStatus};
use tracing::error;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scraperdash_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scraperdash_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scraperdash_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("valid metric definition")
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scraperdash_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .expect("valid metric definition")
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scraperdash_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .expect("valid metric definition")
});

/// WebSocket messages sent by topic root.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scraperdash_ws_messages_sent_total",
            "WebSocket messages sent",
        ),
        &["topic_root"],
    )
    .expect("valid metric definition")
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scraperdash_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Task and Fleet Metrics (collected dynamically)
// =============================================================================

/// Tasks by current state.
pub static TASKS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scraperdash_tasks_by_state", "Current task count by state"),
        &["state"],
    )
    .expect("valid metric definition")
});

/// Workers by current status.
pub static WORKERS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "scraperdash_workers_by_status",
            "Current worker count by status",
        ),
        &["status"],
    )
    .expect("valid metric definition")
});

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scraperdash_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .expect("valid metric definition")
});

/// Tasks with a live driver.
pub static TASKS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scraperdash_tasks_active",
        "Number of tasks currently being driven",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let server_metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        // WebSocket
        Box::new(WS_CONNECTIONS_ACTIVE.clone()),
        Box::new(WS_CONNECTIONS_TOTAL.clone()),
        Box::new(WS_MESSAGES_SENT.clone()),
        Box::new(WS_LAG_EVENTS.clone()),
        // Tasks and fleet
        Box::new(TASKS_BY_STATE.clone()),
        Box::new(WORKERS_BY_STATUS.clone()),
        Box::new(ORCHESTRATOR_RUNNING.clone()),
        Box::new(TASKS_ACTIVE.clone()),
    ];

    // Core metrics (bus, orchestrator, steps)
    let core_metrics = scraperdash_core::metrics::all_metrics();

    for metric in server_metrics.into_iter().chain(core_metrics) {
        if let Err(e) = registry.register(metric) {
            error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current
/// values from the orchestrator and the fleet registry.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.orchestrator().status();
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    TASKS_ACTIVE.set(status.active_tasks as i64);

    for task_state in TaskState::ALL {
        let count = status.tasks_by_state.get(&task_state).copied().unwrap_or(0);
        TASKS_BY_STATE
            .with_label_values(&[task_state.as_str()])
            .set(count as i64);
    }

    let workers = state.orchestrator().list_workers();
    for worker_status in [
        WorkerStatus::Online,
        WorkerStatus::Busy,
        WorkerStatus::Offline,
        WorkerStatus::Error,
    ] {
        let count = workers.iter().filter(|w| w.status == worker_status).count();
        WORKERS_BY_STATUS
            .with_label_values(&[worker_status.as_str()])
            .set(count as i64);
    }
}

static TASK_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"task_[0-9a-fA-F]{32}").expect("valid regex"));
static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});
static NUMERIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("valid regex"));

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = TASK_ID_REGEX.replace_all(path, "{id}");
    let result = UUID_REGEX.replace_all(&result, "{id}");
    let result = NUMERIC_REGEX.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_task_id() {
        let path = "/api/v1/tasks/task_550e8400e29b41d4a716446655440000/cancel";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}/cancel");
    }

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/tasks/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/tasks/12345";
        assert_eq!(normalize_path(path), "/api/v1/tasks/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("scraperdash_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_server_and_core_metrics() {
        // Prometheus only outputs vectors that have been touched
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        WS_CONNECTIONS_TOTAL.inc();
        TASKS_BY_STATE.with_label_values(&["executing"]).set(0);
        WORKERS_BY_STATUS.with_label_values(&["online"]).set(0);
        scraperdash_core::metrics::TASKS_SUBMITTED
            .with_label_values(&["scraping"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("scraperdash_http_request_duration_seconds"));
        assert!(output.contains("scraperdash_http_requests_in_flight"));
        assert!(output.contains("scraperdash_ws_connections_total"));
        assert!(output.contains("scraperdash_tasks_by_state"));
        assert!(output.contains("scraperdash_workers_by_status"));
        assert!(output.contains("scraperdash_orchestrator_running"));
        assert!(output.contains("scraperdash_tasks_submitted_total"));
        assert!(output.contains("scraperdash_bus_handler_failures_total"));
    }
}
