//! Task storage trait and the transitions it applies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use super::types::{Step, Task, TaskState, TaskType};

/// Errors from task storage.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task already exists: {0}")]
    AlreadyExists(String),

    #[error("task {task_id} is not executing (state: {state})")]
    TaskNotExecuting { task_id: String, state: TaskState },

    #[error("task {0} already has a plan")]
    PlanAlreadyAttached(String),

    #[error("task {task_id} is at step {expected:?}, got result for step {got}")]
    StepIndexMismatch {
        task_id: String,
        expected: Option<usize>,
        got: usize,
    },

    #[error("invalid mutation for task {task_id}: {reason}")]
    InvalidMutation { task_id: String, reason: String },

    #[error("database error: {0}")]
    Database(String),
}

/// The failing step attached to a [`TaskMutation::Fail`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step_id: String,
    pub cause: String,
}

/// A single atomic transition on one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    /// `Planning -> Executing` with step index 0.
    AttachPlan(Vec<Step>),
    /// Record a successful step. Completes the task on the last step.
    RecordStep { index: usize, output: Value },
    /// Move a non-terminal task to `Failed`.
    Fail {
        reason: String,
        step: Option<StepFailure>,
    },
    /// Move a non-terminal task to `Cancelled`.
    Cancel,
    /// Record the worker running this task.
    Assign(String),
    /// Progress reported by another producer for a task we do not drive.
    ObserveProgress {
        progress: f64,
        assigned_vm: Option<String>,
    },
}

impl TaskMutation {
    pub fn name(&self) -> &'static str {
        match self {
            TaskMutation::AttachPlan(_) => "attach_plan",
            TaskMutation::RecordStep { .. } => "record_step",
            TaskMutation::Fail { .. } => "fail",
            TaskMutation::Cancel => "cancel",
            TaskMutation::Assign(_) => "assign",
            TaskMutation::ObserveProgress { .. } => "observe_progress",
        }
    }
}

/// Apply `mutation` to `task` in place.
///
/// On error `task` is left untouched. Every store backend routes through
/// this function so the transition rules live in one place.
pub fn apply_to(
    task: &mut Task,
    mutation: TaskMutation,
    now: DateTime<Utc>,
) -> Result<(), TaskStoreError> {
    if task.state.is_terminal() {
        return Err(not_executing(task));
    }

    match mutation {
        TaskMutation::AttachPlan(plan) => {
            if task.plan.is_some() {
                return Err(TaskStoreError::PlanAlreadyAttached(task.id.clone()));
            }
            if task.state != TaskState::Planning {
                return Err(not_executing(task));
            }
            if plan.is_empty() {
                return Err(TaskStoreError::InvalidMutation {
                    task_id: task.id.clone(),
                    reason: "plan has no steps".to_string(),
                });
            }
            task.plan = Some(plan);
            task.current_step_index = Some(0);
            task.state = TaskState::Executing;
            task.progress = 0.0;
        }

        TaskMutation::RecordStep { index, output } => {
            if task.state != TaskState::Executing {
                return Err(not_executing(task));
            }
            let len = task.plan_len();
            let step_id = match task.current_step() {
                Some(step) if task.current_step_index == Some(index) => step.id.clone(),
                _ => {
                    return Err(TaskStoreError::StepIndexMismatch {
                        task_id: task.id.clone(),
                        expected: task.current_step_index,
                        got: index,
                    })
                }
            };

            task.result
                .get_or_insert_with(Default::default)
                .insert(step_id, output);

            let completed = index + 1;
            task.current_step_index = Some(completed);
            task.progress = progress(completed, len);
            if completed == len {
                task.state = TaskState::Completed;
                task.end_time = Some(now);
            }
        }

        TaskMutation::Fail { reason, step } => {
            if let Some(failure) = step {
                task.result
                    .get_or_insert_with(Default::default)
                    .insert(failure.step_id, json!({ "error": failure.cause }));
            }
            task.state = TaskState::Failed;
            task.error = Some(reason);
            task.end_time = Some(now);
        }

        TaskMutation::Cancel => {
            task.state = TaskState::Cancelled;
            task.end_time = Some(now);
        }

        TaskMutation::Assign(vm_id) => {
            task.assigned_vm = Some(vm_id);
        }

        TaskMutation::ObserveProgress {
            progress,
            assigned_vm,
        } => {
            if task.plan.is_some() {
                return Err(TaskStoreError::InvalidMutation {
                    task_id: task.id.clone(),
                    reason: "progress of a planned task is derived from its steps".to_string(),
                });
            }
            task.progress = if progress.is_finite() {
                progress.clamp(0.0, 100.0)
            } else {
                0.0
            };
            if assigned_vm.is_some() {
                task.assigned_vm = assigned_vm;
            }
        }
    }

    Ok(())
}

/// `completed / total * 100`, 0 for an empty plan.
pub fn progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

fn not_executing(task: &Task) -> TaskStoreError {
    TaskStoreError::TaskNotExecuting {
        task_id: task.id.clone(),
        state: task.state,
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub task_type: Option<TaskType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.state.is_none_or(|s| s == task.state)
            && self
                .task_type
                .as_ref()
                .is_none_or(|t| *t == task.task_type)
    }

    /// Apply matching, offset and limit to tasks already in list order.
    pub fn select<I>(&self, tasks: I) -> Vec<Task>
    where
        I: IntoIterator<Item = Task>,
    {
        tasks
            .into_iter()
            .filter(|t| self.matches(t))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Storage for task records.
///
/// Tasks are listed in creation order. Every method is atomic with respect
/// to readers.
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails if the id exists.
    fn create(&self, task: Task) -> Result<Task, TaskStoreError>;

    fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError>;

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError>;

    /// Apply one transition and return the updated task.
    fn apply(&self, id: &str, mutation: TaskMutation) -> Result<Task, TaskStoreError>;

    /// Task counts keyed by state. Every state is present.
    fn count_by_state(&self) -> Result<BTreeMap<TaskState, usize>, TaskStoreError> {
        let mut counts: BTreeMap<TaskState, usize> =
            TaskState::ALL.into_iter().map(|s| (s, 0)).collect();
        for task in self.list(&TaskFilter::new())? {
            *counts.entry(task.state).or_default() += 1;
        }
        Ok(counts)
    }
}
