//! In-process topic bus.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::topic::TopicPattern;
use super::BusError;
use crate::metrics::{BUS_HANDLER_FAILURES, BUS_MESSAGES_PUBLISHED};

/// A published message. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Decode the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| BusError::Payload(format!("{}: {}", self.topic, e)))
    }
}

/// Identifier returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscriber callback. Returning an error marks a delivery failure for
/// that handler only.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), BusError> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    pattern: TopicPattern,
    handler: Handler,
}

/// Topic-addressed publish/subscribe bus.
///
/// Delivery is synchronous and in registration order. `publish` takes a
/// snapshot of the subscription table before invoking handlers, so handlers
/// may subscribe, unsubscribe or publish without deadlocking.
pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for every future publish matching `pattern`.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(&Message) -> Result<(), BusError> + Send + Sync + 'static,
    {
        let pattern = TopicPattern::parse(pattern)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        debug!(subscription = %id, pattern = %pattern, "Subscribed");

        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Subscription {
                id,
                pattern,
                handler: Arc::new(handler),
            }));

        Ok(id)
    }

    /// Remove a registration. Returns false if the id was unknown.
    ///
    /// A delivery to this handler that already started is not interrupted.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Publish `payload` on `topic`, invoking matching handlers in
    /// registration order. Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let message = Message {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        BUS_MESSAGES_PUBLISHED
            .with_label_values(&[topic.split('/').next().unwrap_or_default()])
            .inc();

        let snapshot: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.pattern.matches(topic))
            .cloned()
            .collect();

        for subscription in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (subscription.handler)(&message)
            }));

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("handler panicked".to_string()),
            };

            if let Some(reason) = failure {
                BUS_HANDLER_FAILURES.inc();
                warn!(
                    topic = %message.topic,
                    subscription = %subscription.id,
                    pattern = %subscription.pattern,
                    "Bus delivery error: {}",
                    reason
                );
            }
        }

        snapshot.len()
    }

    /// Serialize `payload` and publish it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> Result<usize, BusError> {
        let value =
            serde_json::to_value(payload).map_err(|e| BusError::Payload(e.to_string()))?;
        Ok(self.publish(topic, value))
    }

    /// Subscribe with a channel instead of a callback.
    ///
    /// The returned stream unsubscribes itself when dropped.
    pub fn stream(self: &Arc<Self>, pattern: &str) -> Result<BusStream, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(pattern, move |message| {
            tx.send(message.clone())
                .map_err(|_| BusError::Handler("stream receiver dropped".to_string()))
        })?;

        Ok(BusStream {
            id,
            rx,
            bus: Arc::downgrade(self),
        })
    }

    /// Number of live registrations.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Channel-backed subscription returned by [`EventBus::stream`].
pub struct BusStream {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Message>,
    bus: Weak<EventBus>,
}

impl BusStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next matching message.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for BusStream {
    type Item = Message;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BusStream {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
