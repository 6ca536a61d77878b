//! Types for the task orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::BusError;
use crate::planner::PlanError;
use crate::task::{TaskState, TaskStoreError};

/// Errors that can occur during orchestration.
///
/// Plan and step failures are recorded on the task as its `error` string and
/// never returned to the caller. Unknown ids are.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} is not executing (state: {state})")]
    TaskNotExecuting { task_id: String, state: TaskState },

    #[error("plan generation produced no steps")]
    EmptyPlan,

    #[error("unsupported task type: {0}")]
    UnsupportedTaskType(String),

    /// Carries the failing step's description.
    #[error("step execution failed: {0}")]
    StepExecutionFailed(String),

    #[error("task store error: {0}")]
    Store(TaskStoreError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("orchestrator is not running")]
    NotRunning,
}

impl From<TaskStoreError> for OrchestratorError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => OrchestratorError::TaskNotFound(id),
            TaskStoreError::TaskNotExecuting { task_id, state } => {
                OrchestratorError::TaskNotExecuting { task_id, state }
            }
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<PlanError> for OrchestratorError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::EmptyPlan => OrchestratorError::EmptyPlan,
            PlanError::UnsupportedTaskType(name) => OrchestratorError::UnsupportedTaskType(name),
        }
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the orchestrator is running.
    pub running: bool,
    /// Latest value seen on the connection status topic.
    pub connected: bool,
    /// Tasks with a live driver.
    pub active_tasks: usize,
    pub tasks_by_state: BTreeMap<TaskState, usize>,
    pub workers_online: usize,
    pub workers_busy: usize,
    /// Workers with no heartbeat inside the freshness window.
    pub workers_stale: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_message() {
        let err = OrchestratorError::StepExecutionFailed("Extract target data".to_string());
        assert_eq!(err.to_string(), "step execution failed: Extract target data");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: OrchestratorError = TaskStoreError::NotFound("t".to_string()).into();
        assert!(matches!(err, OrchestratorError::TaskNotFound(id) if id == "t"));

        let err: OrchestratorError = TaskStoreError::TaskNotExecuting {
            task_id: "t".to_string(),
            state: TaskState::Completed,
        }
        .into();
        assert!(matches!(err, OrchestratorError::TaskNotExecuting { .. }));

        let err: OrchestratorError = TaskStoreError::Database("locked".to_string()).into();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }

    #[test]
    fn test_status_serializes_state_keys() {
        let mut status = OrchestratorStatus::default();
        status.tasks_by_state.insert(TaskState::Executing, 2);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["tasks_by_state"]["executing"], 2);
    }
}
