//! WebSocket Handler
//!
//! Real-time chat for a single conversation per connection.

mod hub;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub use hub::ConversationHub;

use crate::api::{ApiError, AppState};
use crate::assistant::{Attachment, MessageKind};
use crate::chat::inbound::{self, InboundError};
use crate::db;

/// Outbound queue depth per connection. A subscriber that falls this far
/// behind is disconnected by the hub.
const OUTBOUND_BUFFER: usize = 256;

/// Chat event delivered to every subscriber of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    pub message: String,
    pub sender: String,
    pub is_ai: bool,
    pub msg_type: MessageKind,
    pub timestamp: String,
    /// Echoed back so the sender can match its optimistic local copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    /// Set for persisted messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Attachment>,
}

impl ChatEvent {
    /// A persisted message written by a participant.
    pub fn user_message(
        message: &db::Message,
        sender: &str,
        client_message_id: Option<String>,
    ) -> Self {
        Self {
            message: message.content.clone(),
            sender: sender.to_string(),
            is_ai: message.is_ai,
            msg_type: MessageKind::Written,
            timestamp: message.created_at.to_rfc3339(),
            client_message_id,
            id: Some(message.id),
            content: Vec::new(),
        }
    }

    /// A persisted assistant reply.
    pub fn assistant_reply(
        message: &db::Message,
        assistant_name: &str,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            message: message.content.clone(),
            sender: assistant_name.to_string(),
            is_ai: true,
            msg_type: MessageKind::Written,
            timestamp: message.created_at.to_rfc3339(),
            client_message_id: None,
            id: Some(message.id),
            content: attachments,
        }
    }

    /// An ephemeral typing indicator. Never persisted.
    pub fn typing(assistant_name: &str, text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            sender: assistant_name.to_string(),
            is_ai: true,
            msg_type: MessageKind::Typing,
            timestamp: Utc::now().to_rfc3339(),
            client_message_id: None,
            id: None,
            content: Vec::new(),
        }
    }
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    /// Conversation traffic, shared by all subscribers
    Chat(ChatEvent),
    /// Problem with a frame this client sent
    Error(ErrorEvent),
}

/// Error frame sent only to the offending client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "error")]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

/// WebSocket upgrade handler.
/// GET /ws/chat/{conversation_id}
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> Response {
    match state.store.find_conversation(conversation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return ApiError::ConversationNotFound(conversation_id).into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: i64) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending events to the WebSocket. The hub owns the only
    // strong sender, so dropping this subscriber ends the outbound stream.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let error_tx = tx.downgrade();

    let subscriber_id = state.hub.join(conversation_id, tx);
    info!(conversation_id, subscriber = %subscriber_id, "WebSocket connected");

    // Spawn task to forward events to WebSocket
    let mut sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Handle incoming messages until the client leaves or the outbound side ends
    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = &mut sender_handle => {
                info!(conversation_id, subscriber = %subscriber_id, "Outbound stream ended");
                break;
            }
        };
        let Some(msg) = msg else { break };

        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = inbound::handle_inbound(&state, conversation_id, text.as_str()).await {
                    warn!(conversation_id, error = %e, "Rejected inbound message");
                    send_error(&error_tx, conversation_id, &e);
                }
            }
            Ok(Message::Ping(_)) => {
                debug!(conversation_id, "Received ping");
            }
            Ok(Message::Close(_)) => {
                info!(conversation_id, subscriber = %subscriber_id, "WebSocket closed");
                break;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup; in-flight replies keep persisting and stop reaching this socket
    state.hub.leave(conversation_id, subscriber_id);
    sender_handle.abort();

    info!(conversation_id, subscriber = %subscriber_id, "WebSocket disconnected");
}

/// Queue an error frame for this connection only. Never waits on a full
/// queue, so the receive loop keeps reading.
fn send_error(
    tx: &mpsc::WeakSender<ServerEvent>,
    conversation_id: i64,
    error: &InboundError,
) -> bool {
    let Some(tx) = tx.upgrade() else {
        return false;
    };
    let frame = ServerEvent::Error(ErrorEvent {
        code: error.code().to_string(),
        message: error.to_string(),
    });
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(e) => {
            warn!(conversation_id, error = %e, "Dropping error frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn stored(content: &str, is_ai: bool) -> db::Message {
        db::Message {
            id: 11,
            conversation_id: 1,
            sender_id: if is_ai { None } else { Some(3) },
            content: content.to_string(),
            is_ai,
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_user_message_wire_shape() {
        let event = ChatEvent::user_message(&stored("hi", false), "alice", Some("c-1".into()));
        assert_eq!(
            serde_json::to_value(ServerEvent::Chat(event)).unwrap(),
            json!({
                "message": "hi",
                "sender": "alice",
                "is_ai": false,
                "msg_type": "written",
                "timestamp": "2026-01-02T03:04:05+00:00",
                "client_message_id": "c-1",
                "id": 11
            })
        );
    }

    #[test]
    fn test_typing_event_has_no_id() {
        let value = serde_json::to_value(ChatEvent::typing("AI Assistant", "...")).unwrap();
        assert_eq!(value["msg_type"], "typing");
        assert_eq!(value["is_ai"], true);
        assert!(value.get("id").is_none());
        assert!(value.get("client_message_id").is_none());
    }

    #[test]
    fn test_error_frame_is_tagged() {
        let frame = ServerEvent::Error(ErrorEvent {
            code: "malformed_message".into(),
            message: "bad".into(),
        });
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({"type": "error", "code": "malformed_message", "message": "bad"})
        );
    }

    fn malformed() -> InboundError {
        serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into()
    }

    #[tokio::test]
    async fn test_send_error_queues_frame_for_connection() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(send_error(&tx.downgrade(), 1, &malformed()));

        let frame = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "malformed_message");
    }

    #[test]
    fn test_send_error_does_not_wait_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(ServerEvent::Chat(ChatEvent::typing("AI Assistant", "busy")))
            .unwrap();

        assert!(!send_error(&tx.downgrade(), 1, &malformed()));
    }

    #[test]
    fn test_send_error_after_disconnect_is_dropped() {
        let (tx, _rx) = mpsc::channel(1);
        let weak = tx.downgrade();
        drop(tx);

        assert!(!send_error(&weak, 1, &malformed()));
    }
}
