//! State shared between the orchestrator, its task drivers and its bus
//! handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::bus::{
    topic, AnnouncedTask, BusError, ConnectionStatusPayload, EventBus, Message,
    TaskAssignedPayload, TaskCancelledPayload, TaskProgressPayload,
};
use crate::executor::{CapabilityTable, StepContext, StepError, StepOutcome};
use crate::fleet::FleetRegistry;
use crate::metrics::TASK_STATE_TRANSITIONS;
use crate::task::{Step, StepFailure, Task, TaskMutation, TaskStore, TaskStoreError};

use super::types::OrchestratorError;

pub(super) struct Shared {
    pub(super) bus: Arc<EventBus>,
    pub(super) store: Arc<dyn TaskStore>,
    pub(super) fleet: Arc<FleetRegistry>,
    pub(super) capabilities: CapabilityTable,
    pub(super) step_timeout: Option<Duration>,
    /// Cancel signal per driven task.
    drivers: Mutex<HashMap<String, Arc<Notify>>>,
    connected: AtomicBool,
}

fn handler_err(e: impl std::fmt::Display) -> BusError {
    BusError::Handler(e.to_string())
}

impl Shared {
    pub(super) fn new(
        bus: Arc<EventBus>,
        store: Arc<dyn TaskStore>,
        fleet: Arc<FleetRegistry>,
        capabilities: CapabilityTable,
        step_timeout: Option<Duration>,
    ) -> Self {
        Self {
            bus,
            store,
            fleet,
            capabilities,
            step_timeout,
            drivers: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    // Driver bookkeeping

    pub(super) fn register_driver(&self, task_id: &str) -> Arc<Notify> {
        let cancel = Arc::new(Notify::new());
        self.drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string(), Arc::clone(&cancel));
        cancel
    }

    pub(super) fn unregister_driver(&self, task_id: &str, cancel: &Arc<Notify>) {
        let mut drivers = self.drivers.lock().unwrap_or_else(PoisonError::into_inner);
        if drivers.get(task_id).is_some_and(|c| Arc::ptr_eq(c, cancel)) {
            drivers.remove(task_id);
        }
    }

    pub(super) fn has_driver(&self, task_id: &str) -> bool {
        self.drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    pub(super) fn active_drivers(&self) -> usize {
        self.drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wake the task's driver so it stops awaiting its step.
    fn wake(&self, task_id: &str) {
        let cancel = self
            .drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned();
        if let Some(cancel) = cancel {
            // Stores a permit if the driver is between steps.
            cancel.notify_one();
        }
    }

    pub(super) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    // Announcements

    pub(super) fn publish_progress(&self, task: &Task) {
        let payload = TaskProgressPayload {
            task_id: task.id.clone(),
            progress: task.progress,
            status: task.state,
            assigned_vm: task.assigned_vm.clone(),
        };
        if let Err(e) = self
            .bus
            .publish_json(&topic::task_progress(&task.id), &payload)
        {
            warn!(task_id = %task.id, "Failed to publish progress: {}", e);
        }
    }

    /// Count a state change and publish it.
    pub(super) fn transitioned(&self, task: &Task) {
        TASK_STATE_TRANSITIONS
            .with_label_values(&[task.state.as_str()])
            .inc();
        self.publish_progress(task);
    }

    // Transitions

    /// Fail a non-terminal task. Returns `None` if it had already left the
    /// running states.
    pub(super) fn fail(
        &self,
        task_id: &str,
        reason: String,
        step: Option<StepFailure>,
    ) -> Result<Option<Task>, OrchestratorError> {
        match self.store.apply(task_id, TaskMutation::Fail { reason, step }) {
            Ok(task) => {
                warn!(
                    task_id = %task.id,
                    error = task.error.as_deref().unwrap_or_default(),
                    "Task failed"
                );
                self.transitioned(&task);
                Ok(Some(task))
            }
            Err(TaskStoreError::TaskNotExecuting { state, .. }) => {
                debug!(task_id = %task_id, state = %state, "Discarding failure for finished task");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a task. Returns false if it was already terminal.
    pub(super) fn cancel(&self, task_id: &str, announce: bool) -> Result<bool, OrchestratorError> {
        let task = self
            .store
            .get(task_id)?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if !task.state.can_cancel() {
            return Ok(false);
        }

        let task = match self.store.apply(task_id, TaskMutation::Cancel) {
            Ok(task) => task,
            Err(TaskStoreError::TaskNotExecuting { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        self.wake(task_id);
        info!(task_id = %task_id, step = ?task.current_step_index, "Task cancelled");

        if announce {
            if let Err(e) = self.bus.publish_json(
                &topic::task_cancelled(task_id),
                &TaskCancelledPayload::new(task_id),
            ) {
                warn!(task_id = %task_id, "Failed to publish cancellation: {}", e);
            }
        }
        self.transitioned(&task);
        Ok(true)
    }

    /// Claim a worker for the task's scrape steps and announce it.
    pub(super) fn assign_worker(&self, task: &Task, step: &Step) -> Option<String> {
        let required: Vec<&str> = step
            .params
            .get("requiredCapabilities")
            .and_then(Value::as_array)
            .map(|caps| caps.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(worker) = self
            .fleet
            .claim_available(&task.id, |w| required.iter().all(|c| w.has_capability(c)))
        else {
            debug!(task_id = %task.id, ?required, "No worker available, dispatching unassigned");
            return None;
        };

        let updated = match self
            .store
            .apply(&task.id, TaskMutation::Assign(worker.id.clone()))
        {
            Ok(updated) => updated,
            Err(e) => {
                self.fleet.release_task(&task.id);
                debug!(task_id = %task.id, "Not assigning worker: {}", e);
                return None;
            }
        };

        info!(task_id = %task.id, vm_id = %worker.id, "Worker assigned");
        let payload = TaskAssignedPayload {
            task_id: task.id.clone(),
            vm_id: worker.id.clone(),
            status: "running".to_string(),
        };
        if let Err(e) = self
            .bus
            .publish_json(&topic::task_assigned(&task.id), &payload)
        {
            warn!(task_id = %task.id, "Failed to publish assignment: {}", e);
        }
        self.publish_progress(&updated);

        Some(worker.id)
    }

    /// Run one step through its capability, honouring the step timeout.
    pub(super) async fn run_step(
        &self,
        ctx: &StepContext,
        step: &Step,
    ) -> Result<StepOutcome, StepError> {
        let executor = self
            .capabilities
            .get(step.action)
            .ok_or(StepError::NoCapability(step.action))?;

        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, executor.execute(ctx, step))
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::Timeout(
                        u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    ))
                }),
            None => executor.execute(ctx, step).await,
        }
    }

    // Inbound bus traffic from other producers

    /// `task/queue/new`: import tasks we have never seen.
    pub(super) fn on_task_announced(&self, message: &Message) -> Result<(), BusError> {
        let task = message.decode::<AnnouncedTask>()?.into_task();
        if self.store.get(&task.id).map_err(handler_err)?.is_some() {
            return Ok(());
        }

        let (task_id, state) = (task.id.clone(), task.state);
        match self.store.create(task) {
            Ok(_) => {
                info!(task_id = %task_id, state = %state, "Imported task from another producer");
                Ok(())
            }
            Err(TaskStoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(handler_err(e)),
        }
    }

    /// `task/+/assigned`: remember the worker on live tasks.
    pub(super) fn on_task_assigned(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskAssignedPayload = message.decode()?;
        let Some(task) = self.store.get(&payload.task_id).map_err(handler_err)? else {
            return Ok(());
        };
        if task.is_terminal() || task.assigned_vm.as_deref() == Some(payload.vm_id.as_str()) {
            return Ok(());
        }

        match self
            .store
            .apply(&task.id, TaskMutation::Assign(payload.vm_id))
        {
            Ok(updated) => {
                self.publish_progress(&updated);
                Ok(())
            }
            Err(TaskStoreError::TaskNotExecuting { .. }) => Ok(()),
            Err(e) => Err(handler_err(e)),
        }
    }

    /// `task/+/cancelled`: same transition as a local cancel.
    pub(super) fn on_task_cancelled(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskCancelledPayload = message.decode()?;
        match self.cancel(&payload.task_id, false) {
            Ok(_) | Err(OrchestratorError::TaskNotFound(_)) => Ok(()),
            Err(e) => Err(handler_err(e)),
        }
    }

    /// `task/+/progress`: only tasks we observe rather than drive.
    pub(super) fn on_task_progress(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskProgressPayload = message.decode()?;
        let Some(task) = self.store.get(&payload.task_id).map_err(handler_err)? else {
            return Ok(());
        };
        if task.plan.is_some() || task.is_terminal() {
            return Ok(());
        }

        match self.store.apply(
            &task.id,
            TaskMutation::ObserveProgress {
                progress: payload.progress,
                assigned_vm: payload.assigned_vm,
            },
        ) {
            Ok(_) | Err(TaskStoreError::TaskNotExecuting { .. }) => Ok(()),
            Err(e) => Err(handler_err(e)),
        }
    }

    /// `mqtt/connection/status`
    pub(super) fn on_connection_status(&self, message: &Message) -> Result<(), BusError> {
        let payload: ConnectionStatusPayload = message.decode()?;
        let previous = self.connected.swap(payload.connected, Ordering::Relaxed);
        if previous != payload.connected {
            info!(connected = payload.connected, "Connection status changed");
        }
        Ok(())
    }

    /// Fail every unfinished task a previous run planned and no longer
    /// drives. Imported tasks carry no plan and belong to their producer.
    pub(super) fn recover_interrupted(&self, reason: &str) -> usize {
        let tasks = match self.store.list(&Default::default()) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to list tasks for recovery: {}", e);
                return 0;
            }
        };

        let mut recovered = 0;
        for task in tasks
            .into_iter()
            .filter(|t| t.plan.is_some() && !t.is_terminal() && !self.has_driver(&t.id))
        {
            match self.fail(&task.id, reason.to_string(), None) {
                Ok(Some(_)) => recovered += 1,
                Ok(None) => {}
                Err(e) => warn!(task_id = %task.id, "Failed to recover task: {}", e),
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered interrupted tasks");
        }
        recovered
    }
}
