//! Mock scraper worker for testing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};

use crate::bus::{topic, BusError, EventBus, ScrapeRequest, ScrapeResult, SubscriptionId};
use crate::planner;

/// How the mock answers `scraper/execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Answer every request as soon as it is published.
    Auto,
    /// Record requests and answer only through [`MockScraperWorker::respond`].
    Manual,
}

#[derive(Debug)]
struct MockState {
    mode: ResponseMode,
    requests: Vec<ScrapeRequest>,
    /// 1-based plan positions answered with a failure.
    failing_steps: BTreeSet<usize>,
    data: Value,
}

/// Stand-in for a fleet agent on the bus.
///
/// Provides controllable behavior for testing:
/// - Answer scrape requests automatically or by hand
/// - Fail chosen plan steps
/// - Record every request for assertions
///
/// # Example
///
/// ```rust,ignore
/// use scraperdash_core::testing::MockScraperWorker;
///
/// let worker = MockScraperWorker::manual(Arc::clone(&bus))?;
/// let id = orchestrator.submit_task(fixtures::scraping_task("https://x.test")).await?;
///
/// let requests = worker.wait_for_requests(1, Duration::from_secs(1)).await;
/// worker.respond(&requests[0], true);
/// ```
pub struct MockScraperWorker {
    bus: Arc<EventBus>,
    state: Arc<Mutex<MockState>>,
    subscription: SubscriptionId,
}

impl std::fmt::Debug for MockScraperWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScraperWorker")
            .field("subscription", &self.subscription)
            .field("state", &"<state>")
            .finish()
    }
}

impl MockScraperWorker {
    /// A worker that answers every request successfully and immediately.
    pub fn auto(bus: Arc<EventBus>) -> Result<Self, BusError> {
        Self::with_mode(bus, ResponseMode::Auto)
    }

    /// A worker that only records requests.
    pub fn manual(bus: Arc<EventBus>) -> Result<Self, BusError> {
        Self::with_mode(bus, ResponseMode::Manual)
    }

    pub fn with_mode(bus: Arc<EventBus>, mode: ResponseMode) -> Result<Self, BusError> {
        let state = Arc::new(Mutex::new(MockState {
            mode,
            requests: Vec::new(),
            failing_steps: BTreeSet::new(),
            data: default_data(),
        }));

        let handler_state = Arc::downgrade(&state);
        let handler_bus = Arc::downgrade(&bus);
        let subscription = bus.subscribe(topic::SCRAPER_EXECUTE, move |message| {
            let request: ScrapeRequest = message.decode()?;
            let (Some(state), Some(bus)) = (handler_state.upgrade(), handler_bus.upgrade()) else {
                return Ok(());
            };

            let auto_result = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.requests.push(request.clone());
                match state.mode {
                    ResponseMode::Auto => Some(answer(&state, &request, None)),
                    ResponseMode::Manual => None,
                }
            };

            if let Some(result) = auto_result {
                bus.publish_json(topic::SCRAPER_RESULT, &result)?;
            }
            Ok(())
        })?;

        Ok(Self {
            bus,
            state,
            subscription,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: ResponseMode) {
        self.lock().mode = mode;
    }

    /// Answer plan step `n` (1-based) with a failure in auto mode.
    pub fn fail_step(&self, n: usize) {
        self.lock().failing_steps.insert(n);
    }

    /// Data returned with successful answers.
    pub fn set_data(&self, data: Value) {
        self.lock().data = data;
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ScrapeRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Wait until at least `count` requests arrived or `timeout` passed.
    /// Returns the requests seen so far either way.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<ScrapeRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= count || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Publish a result for `request`. Successful answers assert the
    /// step's required facts. Returns the handlers reached.
    pub fn respond(&self, request: &ScrapeRequest, success: bool) -> usize {
        let result = answer(&self.lock(), request, Some(success));
        self.bus
            .publish_json(topic::SCRAPER_RESULT, &result)
            .unwrap_or_default()
    }

    /// Publish a successful result that asserts only `facts`.
    pub fn respond_with_facts(&self, request: &ScrapeRequest, facts: &[&str]) -> usize {
        let mut result = answer(&self.lock(), request, Some(true));
        result.facts = facts.iter().map(|f| f.to_string()).collect();
        self.bus
            .publish_json(topic::SCRAPER_RESULT, &result)
            .unwrap_or_default()
    }
}

impl Drop for MockScraperWorker {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

fn default_data() -> Value {
    json!({
        "data": [
            {"title": "First"},
            {"title": "Second"},
        ]
    })
}

/// Build the answer for `request`; `success = None` applies the failing
/// step set.
fn answer(state: &MockState, request: &ScrapeRequest, success: Option<bool>) -> ScrapeResult {
    let success = success.unwrap_or_else(|| {
        !state
            .failing_steps
            .iter()
            .any(|&n| request.step_id == planner::step_id(&request.task_id, n))
    });

    if success {
        ScrapeResult {
            task_id: request.task_id.clone(),
            step_id: request.step_id.clone(),
            success: true,
            facts: request.step.validation.required.iter().cloned().collect(),
            data: state.data.clone(),
            error: None,
        }
    } else {
        ScrapeResult {
            task_id: request.task_id.clone(),
            step_id: request.step_id.clone(),
            success: false,
            facts: Vec::new(),
            data: Value::Null,
            error: Some(format!("mock failure for {}", request.step_id)),
        }
    }
}
