//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Event bus (publishes, handler failures)
//! - Orchestrator (submissions, state transitions)
//! - Step execution (results, durations)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Event Bus
// =============================================================================

/// Messages published, by first topic segment.
pub static BUS_MESSAGES_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scraperdash_bus_messages_published_total",
            "Total messages published on the event bus",
        ),
        &["topic_root"], // "vm", "task", "scraper", "mqtt", "config"
    )
    .expect("valid metric definition")
});

/// Handler failures isolated during delivery.
pub static BUS_HANDLER_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scraperdash_bus_handler_failures_total",
        "Total subscriber handler failures during delivery",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Tasks submitted, by type.
pub static TASKS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scraperdash_tasks_submitted_total", "Total tasks submitted"),
        &["type"], // "scraping", "analysis", "configuration", "other"
    )
    .expect("valid metric definition")
});

/// Task state transitions, by target state.
pub static TASK_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scraperdash_task_state_transitions_total",
            "Total task state transitions",
        ),
        &["to_state"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Step Execution
// =============================================================================

/// Step executions, by action and result.
pub static STEP_EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scraperdash_step_executions_total", "Total step executions"),
        &["action", "result"], // result: "success", "failure"
    )
    .expect("valid metric definition")
});

/// Step duration in seconds.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("scraperdash_step_duration_seconds", "Duration of step execution")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["action"],
    )
    .expect("valid metric definition")
});

/// All core metrics, for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Bus
        Box::new(BUS_MESSAGES_PUBLISHED.clone()),
        Box::new(BUS_HANDLER_FAILURES.clone()),
        // Orchestrator
        Box::new(TASKS_SUBMITTED.clone()),
        Box::new(TASK_STATE_TRANSITIONS.clone()),
        // Steps
        Box::new(STEP_EXECUTIONS.clone()),
        Box::new(STEP_DURATION.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        STEP_EXECUTIONS.with_label_values(&["scrape", "success"]).inc();
        let names: Vec<_> = registry
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"scraperdash_step_executions_total".to_string()));
    }
}
