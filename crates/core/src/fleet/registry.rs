//! Fleet registry fed by bus traffic.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::types::{Worker, WorkerStatus};
use crate::bus::{
    topic, BusError, EventBus, HeartbeatPayload, Message, SubscriptionId, TaskAssignedPayload,
    TaskCancelledPayload, TaskProgressPayload,
};

/// Tracks worker liveness and assignment.
///
/// Workers are keyed by id in sorted order, so "first available" is stable.
/// Nothing is ever removed; staleness is derived from `last_heartbeat`.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    workers: RwLock<BTreeMap<String, Worker>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to heartbeat, assignment, cancellation and progress topics.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<(), BusError> {
        let mut ids = Vec::with_capacity(4);

        let registry = Arc::downgrade(self);
        ids.push(bus.subscribe(topic::VM_HEARTBEAT, move |message| {
            with_registry(&registry, |r| r.on_heartbeat(message))
        })?);

        let registry = Arc::downgrade(self);
        ids.push(bus.subscribe(topic::TASK_ASSIGNED, move |message| {
            with_registry(&registry, |r| r.on_assigned(message))
        })?);

        let registry = Arc::downgrade(self);
        ids.push(bus.subscribe(topic::TASK_CANCELLED, move |message| {
            with_registry(&registry, |r| r.on_cancelled(message))
        })?);

        let registry = Arc::downgrade(self);
        ids.push(bus.subscribe(topic::TASK_PROGRESS, move |message| {
            with_registry(&registry, |r| r.on_progress(message))
        })?);

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);

        debug!("Fleet registry attached to bus");
        Ok(())
    }

    /// Drop every bus subscription made by [`attach`](Self::attach).
    pub fn detach(&self, bus: &EventBus) {
        let ids: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in ids {
            bus.unsubscribe(id);
        }
    }

    fn on_heartbeat(&self, message: &Message) -> Result<(), BusError> {
        let payload: HeartbeatPayload = message.decode()?;
        let vm_id = topic::segment(&message.topic, 1)
            .filter(|s| !s.is_empty())
            .unwrap_or(payload.vm_id.as_str())
            .to_string();
        self.record_heartbeat(&vm_id, payload, message.timestamp);
        Ok(())
    }

    fn on_assigned(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskAssignedPayload = message.decode()?;
        self.assign(&payload.task_id, &payload.vm_id);
        Ok(())
    }

    fn on_cancelled(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskCancelledPayload = message.decode()?;
        self.release_task(&payload.task_id);
        Ok(())
    }

    fn on_progress(&self, message: &Message) -> Result<(), BusError> {
        let payload: TaskProgressPayload = message.decode()?;
        if payload.status.is_terminal() {
            self.release_task(&payload.task_id);
        }
        Ok(())
    }

    /// Upsert a worker from a heartbeat.
    ///
    /// A worker holding a task stays busy on `online`/`busy` reports; an
    /// `offline` or `error` report drops its task.
    pub fn record_heartbeat(&self, vm_id: &str, payload: HeartbeatPayload, at: DateTime<Utc>) {
        let mut workers = self.write();
        let worker = workers
            .entry(vm_id.to_string())
            .or_insert_with(|| {
                info!(vm_id = %vm_id, "New worker seen");
                Worker::placeholder(vm_id)
            });

        worker.performance = payload.performance.clamped();
        worker.last_heartbeat = Some(at);
        if let Some(location) = payload.location {
            worker.location = location;
        }
        if payload.ip_address.is_some() {
            worker.ip_address = payload.ip_address;
        }
        if let Some(capabilities) = payload.capabilities {
            worker.capabilities = capabilities;
        }

        if payload.status.is_down() {
            if let Some(task_id) = worker.current_task_id.take() {
                info!(vm_id = %vm_id, task_id = %task_id, status = %payload.status, "Worker went down while holding a task");
            }
            worker.status = payload.status;
        } else if worker.current_task_id.is_some() {
            worker.status = WorkerStatus::Busy;
        } else {
            worker.status = WorkerStatus::Online;
        }
    }

    /// Mark `vm_id` busy with `task_id`, creating the worker if unknown.
    pub fn assign(&self, task_id: &str, vm_id: &str) {
        let mut workers = self.write();
        let worker = workers
            .entry(vm_id.to_string())
            .or_insert_with(|| Worker::placeholder(vm_id));
        worker.status = WorkerStatus::Busy;
        worker.current_task_id = Some(task_id.to_string());
        debug!(vm_id = %vm_id, task_id = %task_id, "Worker assigned");
    }

    /// Atomically find the first available worker matching `predicate` and
    /// assign it to `task_id`.
    pub fn claim_available<P>(&self, task_id: &str, predicate: P) -> Option<Worker>
    where
        P: Fn(&Worker) -> bool,
    {
        let mut workers = self.write();
        let worker = workers
            .values_mut()
            .find(|w| w.status == WorkerStatus::Online && predicate(w))?;
        worker.status = WorkerStatus::Busy;
        worker.current_task_id = Some(task_id.to_string());
        Some(worker.clone())
    }

    /// Free whichever worker holds `task_id`. Returns its id.
    pub fn release_task(&self, task_id: &str) -> Option<String> {
        let mut workers = self.write();
        let worker = workers
            .values_mut()
            .find(|w| w.current_task_id.as_deref() == Some(task_id))?;
        worker.current_task_id = None;
        worker.status = WorkerStatus::Online;
        debug!(vm_id = %worker.id, task_id = %task_id, "Worker released");
        Some(worker.id.clone())
    }

    /// Snapshot of all workers, sorted by id.
    pub fn list_workers(&self) -> Vec<Worker> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, vm_id: &str) -> Option<Worker> {
        self.read().get(vm_id).cloned()
    }

    /// First online worker satisfying `predicate`.
    pub fn find_available<P>(&self, predicate: P) -> Option<Worker>
    where
        P: Fn(&Worker) -> bool,
    {
        self.read()
            .values()
            .find(|w| w.status == WorkerStatus::Online && predicate(w))
            .cloned()
    }

    /// Workers with no heartbeat inside `window`.
    pub fn stale_workers(&self, now: DateTime<Utc>, window: Duration) -> Vec<Worker> {
        self.read()
            .values()
            .filter(|w| w.is_stale(now, window))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Worker>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Worker>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn with_registry<F>(registry: &Weak<FleetRegistry>, f: F) -> Result<(), BusError>
where
    F: FnOnce(&FleetRegistry) -> Result<(), BusError>,
{
    match registry.upgrade() {
        Some(registry) => f(&registry),
        None => Ok(()),
    }
}
