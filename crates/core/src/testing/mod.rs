//! Testing utilities and mock implementations.
//!
//! This module provides a mock fleet agent and fixtures, allowing
//! orchestrator tests without a real worker fleet.
//!
//! # Example
//!
//! ```rust,ignore
//! use scraperdash_core::testing::{fixtures, MockScraperWorker};
//!
//! let bus = Arc::new(EventBus::new());
//! let worker = MockScraperWorker::auto(Arc::clone(&bus))?;
//! worker.fail_step(2);
//!
//! // Use with an Orchestrator on the same bus...
//! ```

mod mock_worker;

pub use mock_worker::{MockScraperWorker, ResponseMode};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{json, Value};

    use crate::bus::HeartbeatPayload;
    use crate::fleet::{Performance, WorkerStatus};
    use crate::task::{TaskDescriptor, TaskType};

    /// A scraping task with one selector.
    pub fn scraping_task(url: &str) -> TaskDescriptor {
        TaskDescriptor::new(TaskType::Scraping, format!("Scrape {}", url))
            .with_param("url", json!(url))
            .with_param("selectors", json!({"title": ".t"}))
    }

    /// A scraping task that only workers with `capability` may run.
    pub fn scraping_task_requiring(url: &str, capability: &str) -> TaskDescriptor {
        scraping_task(url).with_param("requiredCapabilities", json!([capability]))
    }

    /// An analysis task over inline `data`.
    pub fn analysis_task(data: Value) -> TaskDescriptor {
        TaskDescriptor::new(TaskType::Analysis, "Analyze records")
            .with_param("data", data)
            .with_param("preprocess", json!(["drop_nulls", "dedupe"]))
            .with_param("analysisType", json!("summary"))
    }

    /// A configuration task applying `config` to `target`.
    pub fn configuration_task(config: Value, target: &str) -> TaskDescriptor {
        TaskDescriptor::new(TaskType::Configuration, format!("Configure {}", target))
            .with_param("config", config)
            .with_param("target", json!(target))
    }

    /// A task type no plan template covers.
    pub fn unsupported_task() -> TaskDescriptor {
        TaskDescriptor::new(TaskType::Other("reporting".to_string()), "Weekly report")
    }

    /// A heartbeat with moderate load.
    pub fn heartbeat(vm_id: &str, status: WorkerStatus) -> HeartbeatPayload {
        HeartbeatPayload {
            vm_id: vm_id.to_string(),
            status,
            performance: Performance {
                cpu: 25.0,
                memory: 40.0,
                success_rate: 98.5,
                tasks_completed: 12,
                avg_response_time_ms: 850.0,
            },
            location: Some("us-east".to_string()),
            ip_address: Some("10.0.0.10".to_string()),
            capabilities: Some(vec!["browser".to_string()]),
            timestamp: None,
        }
    }

    /// A heartbeat advertising `capabilities`.
    pub fn heartbeat_with_capabilities(vm_id: &str, capabilities: &[&str]) -> HeartbeatPayload {
        let mut payload = heartbeat(vm_id, WorkerStatus::Online);
        payload.capabilities = Some(capabilities.iter().map(|c| c.to_string()).collect());
        payload
    }
}
