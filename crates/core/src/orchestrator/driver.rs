//! Per-task driver loop.
//!
//! One driver runs per executing task. It executes the plan one step at a
//! time and yields to the runtime between steps. The store is re-read
//! before each step and every result is applied through a checked
//! mutation, so a result that lands after a cancellation is rejected by the
//! store instead of overwriting the terminal state.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info};

use crate::executor::{check_contract, StepContext};
use crate::metrics::{STEP_DURATION, STEP_EXECUTIONS};
use crate::task::{Step, StepAction, StepFailure, Task, TaskMutation, TaskState, TaskStoreError};

use super::shared::Shared;
use super::types::OrchestratorError;

enum Flow {
    Continue,
    Stop,
}

pub(super) struct TaskDriver {
    shared: Arc<Shared>,
    task_id: String,
    cancel: Arc<Notify>,
    shutdown: broadcast::Receiver<()>,
}

impl TaskDriver {
    pub(super) fn new(
        shared: Arc<Shared>,
        task_id: String,
        cancel: Arc<Notify>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            shared,
            task_id,
            cancel,
            shutdown,
        }
    }

    pub(super) async fn run(mut self) {
        debug!(task_id = %self.task_id, "Task driver started");
        while let Flow::Continue = self.advance().await {
            tokio::task::yield_now().await;
        }
        debug!(task_id = %self.task_id, "Task driver finished");
    }

    async fn advance(&mut self) -> Flow {
        let task = match self.shared.store.get(&self.task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                error!(task_id = %self.task_id, "Driven task disappeared from store");
                return Flow::Stop;
            }
            Err(e) => {
                error!(task_id = %self.task_id, "Failed to load task: {}", e);
                return Flow::Stop;
            }
        };

        if task.state != TaskState::Executing {
            return Flow::Stop;
        }
        let (Some(index), Some(step)) = (task.current_step_index, task.current_step().cloned())
        else {
            return Flow::Stop;
        };

        let assigned_vm = match (&task.assigned_vm, step.action) {
            (None, StepAction::Scrape) => self.shared.assign_worker(&task, &step),
            (vm, _) => vm.clone(),
        };

        let ctx = StepContext {
            task_id: task.id.clone(),
            step_index: index,
            assigned_vm,
            previous_output: previous_output(&task, index),
            task_params: task.params.clone(),
        };

        debug!(
            task_id = %task.id,
            step_id = %step.id,
            action = %step.action,
            index,
            "Executing step"
        );

        let started = Instant::now();
        let shared = Arc::clone(&self.shared);
        let cancel = Arc::clone(&self.cancel);
        let result = tokio::select! {
            biased;
            _ = cancel.notified() => {
                debug!(task_id = %task.id, step_id = %step.id, "Step abandoned after cancellation");
                return Flow::Stop;
            }
            _ = self.shutdown.recv() => {
                debug!(task_id = %task.id, step_id = %step.id, "Step abandoned on shutdown");
                return Flow::Stop;
            }
            result = shared.run_step(&ctx, &step) => result,
        };

        STEP_DURATION
            .with_label_values(&[step.action.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let verdict = result
            .map_err(|e| e.to_string())
            .and_then(|outcome| check_contract(&step, &outcome).map(|()| outcome));

        STEP_EXECUTIONS
            .with_label_values(&[
                step.action.as_str(),
                if verdict.is_ok() { "success" } else { "failure" },
            ])
            .inc();

        match verdict {
            Ok(outcome) => self.record(index, &step, outcome.output),
            Err(cause) => self.fail(&step, cause),
        }
    }

    fn record(&self, index: usize, step: &Step, output: Value) -> Flow {
        match self
            .shared
            .store
            .apply(&self.task_id, TaskMutation::RecordStep { index, output })
        {
            Ok(task) if task.state == TaskState::Completed => {
                info!(task_id = %task.id, steps = task.plan_len(), "Task completed");
                self.shared.transitioned(&task);
                Flow::Stop
            }
            Ok(task) => {
                self.shared.publish_progress(&task);
                Flow::Continue
            }
            Err(TaskStoreError::TaskNotExecuting { state, .. }) => {
                debug!(
                    task_id = %self.task_id,
                    step_id = %step.id,
                    state = %state,
                    "Discarding stale step result"
                );
                Flow::Stop
            }
            Err(e) => {
                error!(task_id = %self.task_id, step_id = %step.id, "Failed to record step: {}", e);
                Flow::Stop
            }
        }
    }

    fn fail(&self, step: &Step, cause: String) -> Flow {
        debug!(task_id = %self.task_id, step_id = %step.id, cause = %cause, "Step failed");
        let reason = OrchestratorError::StepExecutionFailed(step.description.clone()).to_string();
        let failure = StepFailure {
            step_id: step.id.clone(),
            cause,
        };
        if let Err(e) = self.shared.fail(&self.task_id, reason, Some(failure)) {
            error!(task_id = %self.task_id, "Failed to record step failure: {}", e);
        }
        Flow::Stop
    }
}

impl Drop for TaskDriver {
    fn drop(&mut self) {
        self.shared.unregister_driver(&self.task_id, &self.cancel);
    }
}

fn previous_output(task: &Task, index: usize) -> Option<Value> {
    let previous = task.plan.as_ref()?.get(index.checked_sub(1)?)?;
    task.result.as_ref()?.get(&previous.id).cloned()
}
