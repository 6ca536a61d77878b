//! Task orchestrator implementation.
//!
//! Owns the task state machine: submission plans the task synchronously,
//! then a `TaskDriver` per task executes the plan. Tasks progress
//! independently; there is no global lock across tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{topic, BusError, ConnectionStatusPayload, EventBus, Message, SubscriptionId};
use crate::executor::CapabilityTable;
use crate::fleet::{FleetRegistry, Worker, WorkerStatus};
use crate::metrics::TASKS_SUBMITTED;
use crate::planner;
use crate::task::{Task, TaskDescriptor, TaskFilter, TaskMutation, TaskStore, TaskType};

use super::config::OrchestratorConfig;
use super::driver::TaskDriver;
use super::shared::Shared;
use super::types::{OrchestratorError, OrchestratorStatus};

/// Failure reason for tasks left unfinished by a previous run.
pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// Default heartbeat freshness window.
const DEFAULT_FRESHNESS_SECS: i64 = 30;

type Route = fn(&Shared, &Message) -> Result<(), BusError>;

/// The task orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    shared: Arc<Shared>,
    heartbeat_freshness: chrono::Duration,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Orchestrator {
    /// Create an orchestrator with the standard capabilities: scrape over
    /// the bus, analyze and configure in process.
    pub fn new(
        config: OrchestratorConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn TaskStore>,
        fleet: Arc<FleetRegistry>,
    ) -> Result<Self, OrchestratorError> {
        let capabilities = CapabilityTable::standard(Arc::clone(&bus))?;
        Ok(Self::with_capabilities(
            config,
            bus,
            store,
            fleet,
            capabilities,
        ))
    }

    /// Create an orchestrator with a custom capability table.
    pub fn with_capabilities(
        config: OrchestratorConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn TaskStore>,
        fleet: Arc<FleetRegistry>,
        capabilities: CapabilityTable,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Shared::new(bus, store, fleet, capabilities, config.step_timeout());

        Self {
            config,
            shared: Arc::new(shared),
            heartbeat_freshness: chrono::Duration::seconds(DEFAULT_FRESHNESS_SECS),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Window after which a silent worker counts as stale in [`status`](Self::status).
    pub fn with_heartbeat_freshness(mut self, secs: u64) -> Self {
        self.heartbeat_freshness = chrono::Duration::from_std(Duration::from_secs(secs))
            .unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    pub fn fleet(&self) -> &Arc<FleetRegistry> {
        &self.shared.fleet
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the orchestrator: subscribe to inbound task traffic, fail tasks
    /// left unfinished by a previous run, and announce the connection.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(());
        }

        info!("Starting task orchestrator");

        if let Err(e) = self.subscribe_inbound() {
            self.unsubscribe_inbound();
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        self.shared.recover_interrupted(INTERRUPTED_REASON);

        self.shared.bus.publish_json(
            topic::CONNECTION_STATUS,
            &ConnectionStatusPayload { connected: true },
        )?;

        info!("Task orchestrator started");
        Ok(())
    }

    /// Stop the orchestrator. Running drivers abandon their current step;
    /// their tasks stay as they are.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping task orchestrator");

        // Signal shutdown to all drivers
        let _ = self.shutdown_tx.send(());

        // Give drivers a moment to unwind
        for _ in 0..50 {
            if self.shared.active_drivers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if let Err(e) = self.shared.bus.publish_json(
            topic::CONNECTION_STATUS,
            &ConnectionStatusPayload { connected: false },
        ) {
            warn!("Failed to publish connection status: {}", e);
        }
        self.unsubscribe_inbound();

        info!("Task orchestrator stopped");
    }

    fn subscribe_inbound(&self) -> Result<(), BusError> {
        let routes: [(&str, Route); 5] = [
            (topic::TASK_QUEUE_NEW, Shared::on_task_announced),
            (topic::TASK_ASSIGNED, Shared::on_task_assigned),
            (topic::TASK_CANCELLED, Shared::on_task_cancelled),
            (topic::TASK_PROGRESS, Shared::on_task_progress),
            (topic::CONNECTION_STATUS, Shared::on_connection_status),
        ];

        for (pattern, route) in routes {
            let shared = Arc::downgrade(&self.shared);
            let id = self.shared.bus.subscribe(pattern, move |message| {
                match shared.upgrade() {
                    Some(shared) => route(&shared, message),
                    None => Ok(()),
                }
            })?;
            self.subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id);
        }
        Ok(())
    }

    fn unsubscribe_inbound(&self) {
        let ids: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in ids {
            self.shared.bus.unsubscribe(id);
        }
    }

    /// Submit a task. Plans it immediately and starts driving it.
    ///
    /// Planning failures do not error: the task is recorded as failed and its
    /// id is returned like any other.
    pub async fn submit_task(&self, descriptor: TaskDescriptor) -> Result<String, OrchestratorError> {
        if !self.is_running() {
            return Err(OrchestratorError::NotRunning);
        }

        let task_id = format!("task_{}", Uuid::new_v4().simple());
        let task = self
            .shared
            .store
            .create(Task::new(task_id.clone(), descriptor, Utc::now()))?;

        let type_label = match &task.task_type {
            TaskType::Other(_) => "other",
            known => known.as_str(),
        };
        TASKS_SUBMITTED.with_label_values(&[type_label]).inc();
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            title = %task.title,
            "Task submitted"
        );

        self.shared.bus.publish_json(topic::TASK_QUEUE_NEW, &task)?;
        self.shared.transitioned(&task);

        let plan = match planner::generate(&task) {
            Ok(plan) => plan,
            Err(e) => {
                let reason = OrchestratorError::from(e).to_string();
                self.shared.fail(&task_id, reason, None)?;
                return Ok(task_id);
            }
        };

        debug!(task_id = %task_id, steps = plan.len(), "Plan generated");
        let task = self
            .shared
            .store
            .apply(&task_id, TaskMutation::AttachPlan(plan))?;
        self.shared.transitioned(&task);

        self.spawn_driver(&task_id);
        Ok(task_id)
    }

    fn spawn_driver(&self, task_id: &str) {
        let cancel = self.shared.register_driver(task_id);
        let driver = TaskDriver::new(
            Arc::clone(&self.shared),
            task_id.to_string(),
            cancel,
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(driver.run());
    }

    /// Cancel a task. `Ok(false)` if it had already finished.
    pub fn cancel_task(&self, task_id: &str) -> Result<bool, OrchestratorError> {
        self.shared.cancel(task_id, true)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError> {
        Ok(self.shared.store.get(task_id)?)
    }

    /// Every task, in submission order.
    pub fn list_tasks(&self) -> Result<Vec<Task>, OrchestratorError> {
        self.query_tasks(&TaskFilter::new())
    }

    pub fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, OrchestratorError> {
        Ok(self.shared.store.list(filter)?)
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        self.shared.fleet.list_workers()
    }

    /// Get current orchestrator status.
    pub fn status(&self) -> OrchestratorStatus {
        let tasks_by_state = self.shared.store.count_by_state().unwrap_or_else(|e| {
            warn!("Failed to count tasks: {}", e);
            Default::default()
        });

        let now = Utc::now();
        let workers = self.shared.fleet.list_workers();
        let count = |status: WorkerStatus| workers.iter().filter(|w| w.status == status).count();

        OrchestratorStatus {
            running: self.is_running(),
            connected: self.shared.is_connected(),
            active_tasks: self.shared.active_drivers(),
            tasks_by_state,
            workers_online: count(WorkerStatus::Online),
            workers_busy: count(WorkerStatus::Busy),
            workers_stale: self
                .shared
                .fleet
                .stale_workers(now, self.heartbeat_freshness)
                .len(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.unsubscribe_inbound();
    }
}
