//! Scrape steps dispatched to the worker fleet over the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{StepContext, StepError, StepExecutor, StepOutcome};
use crate::bus::{topic, BusError, EventBus, ScrapeRequest, ScrapeResult, SubscriptionId};
use crate::task::Step;

type WaiterKey = (String, String);
type Waiters = Mutex<HashMap<WaiterKey, Waiter>>;

struct Waiter {
    generation: u64,
    tx: oneshot::Sender<ScrapeResult>,
}

/// Publishes `scraper/execute` and waits for the `scraper/result` carrying
/// the same task and step id.
///
/// There is no built-in deadline. A step whose result never arrives waits
/// until the caller gives up.
pub struct BusScrapeExecutor {
    bus: Arc<EventBus>,
    waiters: Arc<Waiters>,
    next_generation: AtomicU64,
    subscription: SubscriptionId,
}

impl BusScrapeExecutor {
    pub fn new(bus: Arc<EventBus>) -> Result<Self, BusError> {
        let waiters: Arc<Waiters> = Arc::new(Mutex::new(HashMap::new()));
        let weak: Weak<Waiters> = Arc::downgrade(&waiters);

        let subscription = bus.subscribe(topic::SCRAPER_RESULT, move |message| {
            let result: ScrapeResult = message.decode()?;
            let Some(waiters) = weak.upgrade() else {
                return Ok(());
            };
            let key = (result.task_id.clone(), result.step_id.clone());
            let waiter = waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);

            match waiter {
                Some(Waiter { tx, .. }) => {
                    // The receiver may have given up already.
                    let _ = tx.send(result);
                }
                None => {
                    debug!(
                        task_id = %key.0,
                        step_id = %key.1,
                        "Dropping scrape result with no waiter"
                    );
                }
            }
            Ok(())
        })?;

        Ok(Self {
            bus,
            waiters,
            next_generation: AtomicU64::new(0),
            subscription,
        })
    }

    /// Number of steps currently awaiting a result.
    pub fn pending(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for BusScrapeExecutor {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

/// Removes the waiter when the awaiting future completes or is dropped,
/// unless a newer wait on the same key has replaced it.
struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    key: WaiterKey,
    generation: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if waiters
            .get(&self.key)
            .is_some_and(|w| w.generation == self.generation)
        {
            waiters.remove(&self.key);
        }
    }
}

#[async_trait]
impl StepExecutor for BusScrapeExecutor {
    async fn execute(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, StepError> {
        let key = (ctx.task_id.clone(), step.id.clone());
        let (tx, rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Register before publishing: a worker may answer during the publish.
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters
                .insert(key.clone(), Waiter { generation, tx })
                .is_some()
            {
                warn!(task_id = %key.0, step_id = %key.1, "Replacing existing scrape waiter");
            }
        }
        let _guard = WaiterGuard {
            waiters: &self.waiters,
            key,
            generation,
        };

        let request = ScrapeRequest {
            task_id: ctx.task_id.clone(),
            step_id: step.id.clone(),
            vm_id: ctx.assigned_vm.clone(),
            step: step.clone(),
        };
        self.bus
            .publish_json(topic::SCRAPER_EXECUTE, &request)
            .map_err(|e| StepError::Failed(e.to_string()))?;

        debug!(task_id = %ctx.task_id, step_id = %step.id, vm_id = ?ctx.assigned_vm, "Scrape request dispatched");

        let result = rx
            .await
            .map_err(|_| StepError::Failed("scrape result channel closed".to_string()))?;

        if result.success {
            Ok(StepOutcome {
                facts: result.facts.into_iter().collect(),
                output: result.data,
            })
        } else {
            Err(StepError::Failed(
                result
                    .error
                    .unwrap_or_else(|| "worker reported failure".to_string()),
            ))
        }
    }
}
