//! Topic-based publish/subscribe event bus.
//!
//! Every component of the dashboard talks through this bus: workers publish
//! heartbeats and results, the orchestrator announces lifecycle events, and
//! the HTTP layer fans messages out to WebSocket clients.

mod event_bus;
pub mod payloads;
pub mod topic;

pub use event_bus::{BusStream, EventBus, Handler, Message, SubscriptionId};
pub use payloads::{
    AgentTimestamp, AnnouncedTask, ConnectionStatusPayload, HeartbeatPayload, QueuedTaskPayload,
    ScrapeRequest, ScrapeResult, TaskAssignedPayload, TaskCancelledPayload, TaskProgressPayload,
};
pub use topic::TopicPattern;

use thiserror::Error;

/// Errors raised by the bus or its handlers.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid topic pattern: {0}")]
    InvalidPattern(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("malformed payload: {0}")]
    Payload(String),
}
