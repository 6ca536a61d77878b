//! Wire shapes for the bus topics.
//!
//! Field names are camelCase on the wire to stay compatible with existing
//! fleet agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fleet::{Performance, WorkerStatus};
use crate::task::{Params, Step, Task, TaskState, TaskType};

/// `vm/{id}/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// The topic segment wins when both are present.
    #[serde(default)]
    pub vm_id: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<AgentTimestamp>,
}

/// Agents send either epoch milliseconds or an ISO-8601 string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AgentTimestamp {
    Millis(i64),
    Iso(DateTime<Utc>),
}

impl AgentTimestamp {
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            AgentTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms),
            AgentTimestamp::Iso(at) => Some(at),
        }
    }
}

/// `task/{id}/assigned`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignedPayload {
    pub task_id: String,
    pub vm_id: String,
    #[serde(default = "running")]
    pub status: String,
}

fn running() -> String {
    "running".to_string()
}

/// `task/{id}/cancelled`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCancelledPayload {
    pub task_id: String,
    #[serde(default = "cancelled")]
    pub status: String,
}

fn cancelled() -> String {
    "cancelled".to_string()
}

impl TaskCancelledPayload {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: cancelled(),
        }
    }
}

/// `task/{id}/progress`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressPayload {
    pub task_id: String,
    pub progress: f64,
    pub status: TaskState,
    #[serde(rename = "assignedVM", default)]
    pub assigned_vm: Option<String>,
}

/// `task/queue/new` as announced by queue producers that track a bare URL
/// instead of a full task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTaskPayload {
    pub id: String,
    pub url: String,
    pub status: TaskState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub strategy: Value,
    #[serde(rename = "assignedVM", default, skip_serializing_if = "Option::is_none")]
    pub assigned_vm: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueuedTaskPayload {
    /// A scraping task observed from outside, with no plan of ours.
    pub fn into_task(self) -> Task {
        let mut params = Params::new();
        params.insert("url".to_string(), Value::String(self.url.clone()));
        if !self.strategy.is_null() {
            params.insert("strategy".to_string(), self.strategy);
        }
        let end_time = self.status.is_terminal().then(Utc::now);

        Task {
            id: self.id,
            task_type: TaskType::Scraping,
            title: self.url,
            description: String::new(),
            state: self.status,
            params,
            plan: None,
            current_step_index: None,
            result: None,
            error: None,
            progress: self.progress.clamp(0.0, 100.0),
            assigned_vm: self.assigned_vm,
            start_time: self.created_at,
            end_time,
        }
    }
}

/// Either of the task shapes seen on `task/queue/new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnnouncedTask {
    Full(Box<Task>),
    Queued(QueuedTaskPayload),
}

impl AnnouncedTask {
    pub fn into_task(self) -> Task {
        match self {
            AnnouncedTask::Full(task) => *task,
            AnnouncedTask::Queued(queued) => queued.into_task(),
        }
    }
}

/// `scraper/execute`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub task_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    pub step: Step,
}

/// `scraper/result`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub task_id: String,
    pub step_id: String,
    pub success: bool,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `mqtt/connection/status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatusPayload {
    pub connected: bool,
}
