//! WebSocket stream of bus traffic for dashboard clients.
//!
//! A [`WsBroadcaster`] subscribes to the event bus once and re-publishes every
//! message into a tokio broadcast channel. Each connection then filters that
//! channel with its own topic pattern.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message as WsFrame, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use scraperdash_core::bus::topic;
use scraperdash_core::{BusError, EventBus, Message, SubscriptionId, TopicPattern};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Pattern used when a client does not ask for one.
pub const DEFAULT_PATTERN: &str = "+/+/+";

/// Deepest topic forwarded to WebSocket clients.
pub const MAX_TOPIC_DEPTH: usize = 6;

/// Broadcaster for bus messages using a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<Message>,
}

impl WsBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Forward every bus message up to [`MAX_TOPIC_DEPTH`] segments.
    pub fn attach(&self, bus: &EventBus) -> Result<Vec<SubscriptionId>, BusError> {
        let mut ids = Vec::with_capacity(MAX_TOPIC_DEPTH);
        for depth in 1..=MAX_TOPIC_DEPTH {
            let pattern = vec![topic::WILDCARD; depth].join("/");
            let broadcaster = self.clone();
            let id = bus.subscribe(&pattern, move |msg| {
                broadcaster.broadcast(msg.clone());
                Ok(())
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Broadcast a message to all connected clients.
    pub fn broadcast(&self, msg: Message) {
        // No receivers just means no client is connected
        let _ = self.sender.send(msg);
    }

    /// Subscribe to receive messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WsErrorResponse {
    pub error: String,
}

/// WebSocket upgrade handler.
///
/// The pattern is validated before the upgrade so a bad pattern gets a plain
/// 400 instead of a socket that closes immediately.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let raw = params
        .pattern
        .unwrap_or_else(|| DEFAULT_PATTERN.to_string());

    let pattern = match TopicPattern::parse(&raw) {
        Ok(pattern) => pattern,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(WsErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, pattern)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, pattern: TopicPattern) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.ws_broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!(pattern = %pattern.as_str(), "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if !pattern.matches(&msg.topic) {
                        continue;
                    }

                    let root = topic::segment(&msg.topic, 0).unwrap_or("");
                    WS_MESSAGES_SENT.with_label_values(&[root]).inc();

                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if sender.send(WsFrame::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to serialize bus message: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} messages", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Broadcast channel closed");
                    break;
                }
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(WsFrame::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(WsFrame::Ping(data)) => {
                debug!("Received ping: {:?}", data);
            }
            Ok(WsFrame::Text(text)) => {
                debug!("Received text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
