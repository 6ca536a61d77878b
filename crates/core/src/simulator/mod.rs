//! Simulated scraper fleet.
//!
//! Stands in for the external worker VMs so the dashboard is usable without
//! a real fleet: publishes periodic heartbeats for the configured workers
//! and answers `scraper/execute` on `scraper/result` after a fixed delay.

mod config;

pub use config::{SimulatedWorker, SimulatorConfig};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::{
    topic, AgentTimestamp, BusError, EventBus, HeartbeatPayload, ScrapeRequest, ScrapeResult,
    SubscriptionId,
};
use crate::fleet::{Performance, WorkerStatus};
use crate::task::Step;

/// Records produced per simulated extraction.
const SIMULATED_RECORDS: usize = 3;

#[derive(Debug, Default, Clone)]
struct WorkerStats {
    busy: usize,
    completed: u64,
    failed: u64,
}

struct Inner {
    config: SimulatorConfig,
    bus: Arc<EventBus>,
    stats: Mutex<HashMap<String, WorkerStats>>,
}

/// Publishes heartbeats and answers scrape requests for a fake fleet.
pub struct FleetSimulator {
    inner: Arc<Inner>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl FleetSimulator {
    pub fn new(config: SimulatorConfig, bus: Arc<EventBus>) -> Self {
        let stats = config
            .workers
            .iter()
            .map(|w| (w.id.clone(), WorkerStats::default()))
            .collect();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                stats: Mutex::new(stats),
            }),
            running: AtomicBool::new(false),
            shutdown_tx,
            subscription: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start answering scrape requests and publishing heartbeats.
    /// The first heartbeat round goes out immediately.
    pub async fn start(&self) -> Result<(), BusError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Fleet simulator already running");
            return Ok(());
        }

        let handle = Handle::current();
        let weak = Arc::downgrade(&self.inner);
        let shutdown_tx = self.shutdown_tx.clone();
        let subscribed = self
            .inner
            .bus
            .subscribe(topic::SCRAPER_EXECUTE, move |message| {
                let request: ScrapeRequest = message.decode()?;
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                let mut shutdown = shutdown_tx.subscribe();
                handle.spawn(async move {
                    let vm_id = inner.claim(&request);
                    let delay = Duration::from_millis(inner.config.response_delay_ms);
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = tokio::time::sleep(delay) => inner.answer(vm_id, request),
                    }
                });
                Ok(())
            });

        let id = match subscribed {
            Ok(id) => id,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let period = Duration::from_millis(inner.config.heartbeat_interval_ms.max(1));
            let mut ticker = tokio::time::interval(period);
            let mut tick = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        inner.publish_heartbeats(tick);
                        tick += 1;
                    }
                }
            }
            debug!("Simulator heartbeat loop stopped");
        });

        info!(
            workers = self.inner.config.workers.len(),
            heartbeat_interval_ms = self.inner.config.heartbeat_interval_ms,
            response_delay_ms = self.inner.config.response_delay_ms,
            "Fleet simulator started"
        );
        Ok(())
    }

    /// Stop the simulator. Pending answers are dropped.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        self.unsubscribe();
        info!("Fleet simulator stopped");
    }

    fn unsubscribe(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.inner.bus.unsubscribe(id);
        }
    }
}

impl Drop for FleetSimulator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.unsubscribe();
    }
}

impl Inner {
    fn publish_heartbeats(&self, tick: u64) {
        let stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, worker) in self.config.workers.iter().enumerate() {
            let worker_stats = stats.get(&worker.id).cloned().unwrap_or_default();
            let busy = worker_stats.busy > 0;
            let phase = index as u64 * 7;
            let load = if busy { 30.0 } else { 0.0 };
            let finished = worker_stats.completed + worker_stats.failed;
            let success_rate = if finished == 0 {
                100.0
            } else {
                worker_stats.completed as f64 / finished as f64 * 100.0
            };

            let payload = HeartbeatPayload {
                vm_id: worker.id.clone(),
                status: if busy {
                    WorkerStatus::Busy
                } else {
                    WorkerStatus::Online
                },
                performance: Performance {
                    cpu: drift(15.0 + load, tick, phase),
                    memory: drift(35.0 + load / 2.0, tick, phase + 3),
                    success_rate,
                    tasks_completed: worker_stats.completed,
                    avg_response_time_ms: self.config.response_delay_ms as f64,
                },
                location: Some(worker.location.clone()),
                ip_address: Some(format!("10.0.0.{}", 10 + index)),
                capabilities: Some(worker.capabilities.clone()),
                timestamp: Some(AgentTimestamp::Millis(Utc::now().timestamp_millis())),
            };

            if let Err(e) = self
                .bus
                .publish_json(&topic::vm_heartbeat(&worker.id), &payload)
            {
                warn!(vm_id = %worker.id, "Failed to publish heartbeat: {}", e);
            }
        }
    }

    /// Pick the worker answering `request` and mark it busy.
    fn claim(&self, request: &ScrapeRequest) -> Option<String> {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let vm_id = match &request.vm_id {
            Some(id) if stats.contains_key(id) => Some(id.clone()),
            _ => stats
                .iter()
                .min_by(|a, b| a.1.busy.cmp(&b.1.busy).then_with(|| a.0.cmp(b.0)))
                .map(|(id, _)| id.clone()),
        };
        if let Some(entry) = vm_id.as_ref().and_then(|id| stats.get_mut(id)) {
            entry.busy += 1;
        }
        vm_id
    }

    fn answer(&self, vm_id: Option<String>, request: ScrapeRequest) {
        let result = simulate(&request, &self.config);

        if let Some(id) = &vm_id {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = stats.get_mut(id) {
                entry.busy = entry.busy.saturating_sub(1);
                if result.success {
                    entry.completed += 1;
                } else {
                    entry.failed += 1;
                }
            }
        }

        debug!(
            task_id = %result.task_id,
            step_id = %result.step_id,
            vm_id = ?vm_id,
            success = result.success,
            "Simulated scrape answered"
        );
        if let Err(e) = self.bus.publish_json(topic::SCRAPER_RESULT, &result) {
            warn!(task_id = %result.task_id, "Failed to publish scrape result: {}", e);
        }
    }
}

/// Result a simulated worker sends for `request`.
fn simulate(request: &ScrapeRequest, config: &SimulatorConfig) -> ScrapeResult {
    let step = &request.step;
    if config.fail_actions.contains(&step.action) {
        return ScrapeResult {
            task_id: request.task_id.clone(),
            step_id: request.step_id.clone(),
            success: false,
            facts: Vec::new(),
            data: Value::Null,
            error: Some(format!("simulated failure for action '{}'", step.action)),
        };
    }

    ScrapeResult {
        task_id: request.task_id.clone(),
        step_id: request.step_id.clone(),
        success: true,
        facts: step.validation.required.iter().cloned().collect(),
        data: simulated_data(step),
        error: None,
    }
}

fn simulated_data(step: &Step) -> Value {
    let mut data = Map::new();
    if let Some(url) = step.params.get("url") {
        data.insert("url".to_string(), url.clone());
        data.insert("status".to_string(), json!(200));
    }

    if let Some(selectors) = step.params.get("selectors").and_then(Value::as_object) {
        let records: Vec<Value> = (0..SIMULATED_RECORDS)
            .map(|i| {
                let mut record = Map::new();
                record.insert("index".to_string(), json!(i));
                for field in selectors.keys() {
                    record.insert(field.clone(), json!(format!("{} {}", field, i + 1)));
                }
                Value::Object(record)
            })
            .collect();
        data.insert("data".to_string(), Value::Array(records));
    }

    Value::Object(data)
}

/// Triangle wave over 20 ticks, scaled to +40 around `base`, clamped to
/// `[0, 100]`.
fn drift(base: f64, tick: u64, phase: u64) -> f64 {
    let position = (tick + phase) % 20;
    let wave = if position < 10 {
        position
    } else {
        20 - position
    };
    (base + wave as f64 * 4.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StepAction, StepValidation};

    fn config(fail_actions: Vec<StepAction>) -> SimulatorConfig {
        SimulatorConfig {
            enabled: true,
            heartbeat_interval_ms: 60_000,
            response_delay_ms: 5,
            fail_actions,
            workers: vec![
                SimulatedWorker::new("vm-a", "lab").with_capability("browser"),
                SimulatedWorker::new("vm-b", "lab"),
            ],
        }
    }

    fn request(vm_id: Option<&str>) -> ScrapeRequest {
        let mut params = crate::task::Params::new();
        params.insert("selectors".to_string(), json!({"title": "h1"}));
        ScrapeRequest {
            task_id: "task_1".to_string(),
            step_id: "task_1-step-2".to_string(),
            vm_id: vm_id.map(str::to_string),
            step: Step {
                id: "task_1-step-2".to_string(),
                action: StepAction::Scrape,
                description: "Extract target data".to_string(),
                params,
                validation: StepValidation::requiring(["dataExtracted", "validationPassed"]),
            },
        }
    }

    #[test]
    fn test_drift_stays_in_range() {
        for tick in 0..100 {
            let value = drift(90.0, tick, 0);
            assert!((0.0..=100.0).contains(&value));
        }
        assert_eq!(drift(15.0, 0, 0), 15.0);
        assert_eq!(drift(15.0, 5, 0), 35.0);
        assert_eq!(drift(15.0, 15, 0), 35.0);
    }

    #[test]
    fn test_simulate_asserts_required_facts() {
        let result = simulate(&request(None), &config(vec![]));
        assert!(result.success);
        assert_eq!(result.facts, vec!["dataExtracted", "validationPassed"]);
        let records = result.data["data"].as_array().unwrap();
        assert_eq!(records.len(), SIMULATED_RECORDS);
        assert_eq!(records[0]["title"], "title 1");
    }

    #[test]
    fn test_simulate_fail_action() {
        let result = simulate(&request(None), &config(vec![StepAction::Scrape]));
        assert!(!result.success);
        assert!(result.facts.is_empty());
        assert!(result.error.unwrap().contains("scrape"));
    }

    #[tokio::test]
    async fn test_publishes_heartbeats_on_start() {
        let bus = Arc::new(EventBus::new());
        let mut heartbeats = bus.stream(topic::VM_HEARTBEAT).unwrap();
        let simulator = FleetSimulator::new(config(vec![]), Arc::clone(&bus));

        simulator.start().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let message = tokio::time::timeout(Duration::from_secs(1), heartbeats.recv())
                .await
                .unwrap()
                .unwrap();
            let payload: HeartbeatPayload = message.decode().unwrap();
            assert_eq!(payload.status, WorkerStatus::Online);
            seen.push(payload.vm_id);
        }
        assert_eq!(seen, vec!["vm-a", "vm-b"]);

        simulator.stop();
        assert!(!simulator.is_running());
    }

    #[tokio::test]
    async fn test_answers_scrape_requests() {
        let bus = Arc::new(EventBus::new());
        let mut results = bus.stream(topic::SCRAPER_RESULT).unwrap();
        let simulator = FleetSimulator::new(config(vec![]), Arc::clone(&bus));
        simulator.start().await.unwrap();

        bus.publish_json(topic::SCRAPER_EXECUTE, &request(Some("vm-b")))
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), results.recv())
            .await
            .unwrap()
            .unwrap();
        let result: ScrapeResult = message.decode().unwrap();
        assert_eq!(result.task_id, "task_1");
        assert_eq!(result.step_id, "task_1-step-2");
        assert!(result.success);

        simulator.stop();
    }

    #[tokio::test]
    async fn test_stop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let simulator = FleetSimulator::new(config(vec![]), Arc::clone(&bus));
        simulator.start().await.unwrap();
        assert_eq!(bus.subscription_count(), 1);

        simulator.stop();
        assert_eq!(bus.subscription_count(), 0);
    }
}
