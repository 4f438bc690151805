//! # WebSocket Module
//!
//! This module pushes session updates to connected clients.
//!
//! ## Features
//!
//! - Status feed updates (the full capped feed on every change)
//! - Flow phase transitions for deposits and withdrawals
//! - Ping/pong keepalive
//!
//! ## Connection Flow
//!
//! ```text
//! 1. Client connects to /ws
//!              ↓
//! 2. Server sends `connected` with the current feed
//!              ↓
//! 3. Events are pushed as they occur:
//!    - status_feed
//!    - transition
//! ```
//!
//! ## Message Format
//!
//! All messages are JSON:
//!
//! ```json
//! {
//!     "event": "transition",
//!     "data": {
//!         "flow": "deposit",
//!         "attempt": 1,
//!         "from": "approving",
//!         "to": "depositing",
//!         "at": "2024-01-15T12:00:00Z"
//!     },
//!     "timestamp": "2024-01-15T12:00:00Z"
//! }
//! ```

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::StatusFeedResponse;
use crate::AppState;

/// WebSocket event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    /// Sent once after the upgrade.
    Connected,
    /// The status feed changed.
    StatusFeed,
    /// A flow changed phase.
    Transition,
    /// Reply to a text frame.
    Ping,
}

/// WebSocket message wrapper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage<T> {
    pub event: WsEventType,
    pub data: T,
    pub timestamp: chrono::DateTime<Utc>,
}

impl<T: Serialize> WsMessage<T> {
    pub fn new(event: WsEventType, data: T) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Configure WebSocket routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket_handler));
}

/// WebSocket connection handler.
///
/// ## Endpoint
///
/// `GET /ws`
///
/// ## Example (JavaScript)
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws');
///
/// ws.onmessage = (event) => {
///     const message = JSON.parse(event.data);
///     if (message.event === 'transition') {
///         console.log(message.data.flow, message.data.to);
///     }
/// };
/// ```
pub async fn websocket_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let mut feed = state.session.status.subscribe();
    let mut transitions = state.session.subscribe_transitions();
    let initial = StatusFeedResponse::new(state.session.status.messages());

    let client_id = Uuid::new_v4();

    actix_rt::spawn(async move {
        info!("WebSocket client connected: {}", client_id);

        if let Ok(json) = WsMessage::new(WsEventType::Connected, initial).to_json() {
            if session.text(json).await.is_err() {
                return;
            }
        }

        loop {
            let outgoing = tokio::select! {
                update = feed.recv() => match update {
                    Ok(messages) => {
                        WsMessage::new(WsEventType::StatusFeed, StatusFeedResponse::new(messages))
                            .to_json()
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Client {} lagged {} status updates", client_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                transition = transitions.recv() => match transition {
                    Ok(transition) => WsMessage::new(WsEventType::Transition, transition).to_json(),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Client {} lagged {} transitions", client_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = msg_stream.next() => match incoming {
                    Some(Ok(Message::Ping(bytes))) => {
                        let _ = session.pong(&bytes).await;
                        continue;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received text: {}", text);
                        WsMessage::new(
                            WsEventType::Ping,
                            serde_json::json!({ "received": text.to_string() }),
                        )
                        .to_json()
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Received unexpected binary message");
                        continue;
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!("Client {} closed: {:?}", client_id, reason);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket protocol error: {}", e);
                        break;
                    }
                    None => break,
                },
            };

            match outgoing {
                Ok(json) => {
                    if let Err(e) = session.text(json).await {
                        debug!("WebSocket session closed: {}", e);
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize WebSocket message: {}", e),
            }
        }

        let _ = session.close(None).await;
        info!("WebSocket client disconnected: {}", client_id);
    });

    Ok(response)
}
