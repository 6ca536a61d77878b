//! Worker model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Reported worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Busy,
    Offline,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Error => "error",
        }
    }

    /// Offline and error workers cannot hold a task.
    pub fn is_down(&self) -> bool {
        matches!(self, WorkerStatus::Offline | WorkerStatus::Error)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performance snapshot carried by heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default, rename = "avgResponseTime", alias = "avgResponseTimeMs")]
    pub avg_response_time_ms: f64,
}

impl Performance {
    /// Clamp percentages into `[0, 100]`. Non-finite values become 0.
    pub fn clamped(mut self) -> Self {
        self.cpu = clamp_percent(self.cpu);
        self.memory = clamp_percent(self.memory);
        self.success_rate = clamp_percent(self.success_rate);
        if !self.avg_response_time_ms.is_finite() || self.avg_response_time_ms < 0.0 {
            self.avg_response_time_ms = 0.0;
        }
        self
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// A remote execution agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub status: WorkerStatus,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    pub performance: Performance,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Worker {
    /// A worker known only by id, e.g. from an assignment that arrived
    /// before its first heartbeat.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: WorkerStatus::Offline,
            location: "unknown".to_string(),
            ip_address: None,
            current_task_id: None,
            performance: Performance::default(),
            last_heartbeat: None,
            capabilities: Vec::new(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// No heartbeat within `window` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_heartbeat {
            Some(at) => now - at > window,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_percentages() {
        let perf = Performance {
            cpu: 150.0,
            memory: -5.0,
            success_rate: f64::NAN,
            tasks_completed: 3,
            avg_response_time_ms: f64::INFINITY,
        }
        .clamped();

        assert_eq!(perf.cpu, 100.0);
        assert_eq!(perf.memory, 0.0);
        assert_eq!(perf.success_rate, 0.0);
        assert_eq!(perf.avg_response_time_ms, 0.0);
        assert_eq!(perf.tasks_completed, 3);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut worker = Worker::placeholder("vm-1");
        assert!(worker.is_stale(now, Duration::seconds(30)));

        worker.last_heartbeat = Some(now - Duration::seconds(10));
        assert!(!worker.is_stale(now, Duration::seconds(30)));

        worker.last_heartbeat = Some(now - Duration::seconds(31));
        assert!(worker.is_stale(now, Duration::seconds(30)));
    }

    #[test]
    fn test_worker_serializes_camel_case() {
        let mut worker = Worker::placeholder("vm-1");
        worker.current_task_id = Some("task_1".to_string());
        worker.status = WorkerStatus::Busy;

        let value = serde_json::to_value(&worker).unwrap();
        assert_eq!(value["currentTaskId"], "task_1");
        assert_eq!(value["status"], "busy");
        assert!(value["performance"].get("avgResponseTime").is_some());
    }
}
