//! Common test utilities for in-process API testing.
//!
//! The fixture wires a real bus, fleet registry and orchestrator behind the
//! router, with a [`MockScraperWorker`] standing in for the remote fleet.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use scraperdash_core::{
    testing::{MockScraperWorker, ResponseMode},
    Config, EventBus, FleetRegistry, MemoryTaskStore, Orchestrator, OrchestratorConfig,
    TaskState,
};
use scraperdash_server::{create_router, AppState, WsBroadcaster};

/// Re-export fixtures for test convenience
pub use scraperdash_core::testing::fixtures;

/// Test fixture for API testing against a live orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/tasks", json!({
///         "type": "scraping",
///         "title": "Product prices",
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub state: Arc<AppState>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    /// Mock scraper worker answering `scraper/execute`
    pub worker: MockScraperWorker,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub response_mode: ResponseMode,
    /// Start the orchestrator before handing out the fixture
    pub start_orchestrator: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            response_mode: ResponseMode::Auto,
            start_orchestrator: true,
        }
    }
}

impl TestConfig {
    /// Scrape requests stay pending until the test answers them.
    pub fn manual() -> Self {
        Self {
            response_mode: ResponseMode::Manual,
            ..Default::default()
        }
    }

    pub fn stopped() -> Self {
        Self {
            start_orchestrator: false,
            ..Default::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with an auto-responding worker.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let config = Config::default();

        let bus = Arc::new(EventBus::new());
        let fleet = Arc::new(FleetRegistry::new());
        fleet.attach(&bus).expect("Failed to attach fleet");

        let ws_broadcaster = WsBroadcaster::new(64);
        ws_broadcaster
            .attach(&bus)
            .expect("Failed to attach broadcaster");

        let worker = MockScraperWorker::with_mode(Arc::clone(&bus), test_config.response_mode)
            .expect("Failed to create mock worker");

        let orchestrator = Arc::new(
            Orchestrator::new(
                OrchestratorConfig::default(),
                Arc::clone(&bus),
                Arc::new(MemoryTaskStore::new()),
                fleet,
            )
            .expect("Failed to create orchestrator"),
        );
        if test_config.start_orchestrator {
            orchestrator
                .start()
                .await
                .expect("Failed to start orchestrator");
        }

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&orchestrator),
            None,
            ws_broadcaster,
        ));

        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            bus,
            orchestrator,
            worker,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    /// GET a path and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll a task over the API until it reaches `state`.
    pub async fn wait_for_state(&self, id: &str, state: TaskState) -> Value {
        let path = format!("/api/v1/tasks/{}", id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let response = self.get(&path).await;
            if response.body["state"] == state.as_str()
                || tokio::time::Instant::now() >= deadline
            {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}
