//! Inbound Chat Messages
//!
//! Handling of a chat frame sent by a storefront client: persist, echo to
//! the conversation and hand the turn to the assistant.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::AppState;
use crate::assistant::{OutboundContext, StoreContext};
use crate::db::{Message, MessageStore, NewMessage, StoreError, User};
use crate::ws::ChatEvent;

/// Display name for messages without a resolvable sender.
pub const GUEST_SENDER: &str = "guest";

/// Chat frame sent by the client.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub message: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub client_message_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<SenderRef>,
    #[serde(flatten)]
    pub store: StoreContext,
}

/// Strings pass through, numbers are stringified, anything else is dropped.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

/// Sender reference as clients send it: usually a number or a string.
///
/// Anything else is accepted and resolves to no user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SenderRef {
    Id(i64),
    Name(String),
    Other(Value),
}

impl SenderRef {
    /// The user ID, if the reference is a number or a string of digits.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(raw) => {
                let raw = raw.trim();
                if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                raw.parse().ok()
            }
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to save message")]
    Persistence(#[from] StoreError),
}

impl InboundError {
    /// Code carried by the error frame sent back to the client.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_message",
            Self::Persistence(_) => "persistence_failed",
        }
    }
}

/// Resolve who sent a message.
///
/// An explicit user reference wins; otherwise the conversation's first
/// participant is assumed. `None` when neither exists.
pub async fn resolve_sender(
    store: &dyn MessageStore,
    conversation_id: i64,
    sender: Option<&SenderRef>,
) -> Result<Option<User>, StoreError> {
    if let Some(user_id) = sender.and_then(SenderRef::user_id) {
        if let Some(user) = store.find_user(user_id).await? {
            return Ok(Some(user));
        }
        debug!(conversation_id, user_id, "Unknown sender, using first participant");
    }

    Ok(store
        .list_participants(conversation_id)
        .await?
        .into_iter()
        .next())
}

/// Process one inbound text frame for a conversation.
///
/// Returns once the message is persisted and published; the assistant
/// turn runs in the background.
pub async fn handle_inbound(
    state: &AppState,
    conversation_id: i64,
    text: &str,
) -> Result<Message, InboundError> {
    let inbound: ClientMessage = serde_json::from_str(text)?;

    debug!(
        conversation_id,
        products = inbound.store.product_count(),
        total_orders = %inbound.store.total_orders,
        has_shop_token = inbound.store.has_shop_token(),
        "Received chat message"
    );

    let sender = resolve_sender(
        state.store.as_ref(),
        conversation_id,
        inbound.sender_id.as_ref(),
    )
    .await?;
    let sender_name = sender
        .as_ref()
        .map_or(GUEST_SENDER, |user| user.username.as_str());

    let message = state
        .store
        .create_message(NewMessage::from_user(
            conversation_id,
            sender.as_ref().map(|user| user.id),
            inbound.message,
        ))
        .await?;

    state.hub.publish(
        conversation_id,
        &ChatEvent::user_message(&message, sender_name, inbound.client_message_id),
    );

    if let Some(webhook) = &state.webhook {
        let context = OutboundContext::new(
            &message,
            sender_name,
            inbound.store,
            &state.config.assistant_persona,
        );
        webhook.invoke(&context, &state.scheduler);
    }

    info!(conversation_id, message_id = message.id, sender = sender_name, "Chat message accepted");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::db::MemoryStore;
    use crate::ws::ServerEvent;

    fn state_with(store: &Arc<MemoryStore>) -> AppState {
        AppState::new(store.clone(), Config::default_for_test()).unwrap()
    }

    #[test]
    fn test_sender_ref_accepts_numbers_and_digit_strings() {
        let parse = |raw: &str| serde_json::from_str::<SenderRef>(raw).unwrap().user_id();
        assert_eq!(parse("7"), Some(7));
        assert_eq!(parse(r#""42""#), Some(42));
        assert_eq!(parse(r#"" 42 ""#), Some(42));
        assert_eq!(parse(r#""alice""#), None);
        assert_eq!(parse(r#""-3""#), None);
        assert_eq!(parse(r#""""#), None);
        assert_eq!(parse("3.0"), None);
        assert_eq!(parse("true"), None);
        assert_eq!(parse(r#"{"id":3}"#), None);
    }

    #[test]
    fn test_client_message_requires_string_message() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"client_message_id":"x"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"message":5}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());

        let parsed: ClientMessage =
            serde_json::from_str(r#"{"message":"hi","total_orders":3,"products":null}"#).unwrap();
        assert_eq!(parsed.message, "hi");
        assert_eq!(parsed.store.total_orders, 3);
        assert_eq!(parsed.store.products, serde_json::json!([]));
    }

    #[test]
    fn test_odd_context_types_do_not_reject_the_frame() {
        for frame in [
            r#"{"message":"hi","total_products":12.0}"#,
            r#"{"message":"hi","total_orders":-1}"#,
            r#"{"message":"hi","shop_details":[]}"#,
            r#"{"message":"hi","sender_id":3.0}"#,
            r#"{"message":"hi","total_customers":"5"}"#,
            r#"{"message":"hi","products":"none","shopify_token":false,"client_message_id":null}"#,
            r#"{"message":"hi","client_message_id":{"k":1}}"#,
        ] {
            let parsed = serde_json::from_str::<ClientMessage>(frame)
                .unwrap_or_else(|e| panic!("{frame} rejected: {e}"));
            assert_eq!(parsed.message, "hi");
        }

        let parsed: ClientMessage =
            serde_json::from_str(r#"{"message":"hi","client_message_id":17}"#).unwrap();
        assert_eq!(parsed.client_message_id.as_deref(), Some("17"));
    }

    #[tokio::test]
    async fn test_odd_context_is_stored_and_echoed() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.seed_user("alice").await;
        let conversation = store.seed_conversation(&[alice.id]).await;
        let state = state_with(&store);
        let (tx, mut rx) = mpsc::channel(8);
        state.hub.join(conversation.id, tx);

        let message = handle_inbound(
            &state,
            conversation.id,
            r#"{"message":"hi","sender_id":3.0,"total_products":12.0,"shop_details":[]}"#,
        )
        .await
        .unwrap();

        // Unresolvable sender falls back to the first participant
        assert_eq!(message.sender_id, Some(alice.id));
        assert_eq!(store.messages().await.len(), 1);
        let ServerEvent::Chat(event) = rx.recv().await.unwrap() else {
            panic!("expected chat event");
        };
        assert_eq!(event.message, "hi");
    }

    #[tokio::test]
    async fn test_resolve_sender_prefers_explicit_user() {
        let store = MemoryStore::new();
        let alice = store.seed_user("alice").await;
        let bob = store.seed_user("bob").await;
        let conversation = store.seed_conversation(&[alice.id, bob.id]).await;

        let explicit = SenderRef::Name(bob.id.to_string());
        let resolved = resolve_sender(&store, conversation.id, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(resolved, Some(bob));

        let unknown = SenderRef::Id(999);
        let resolved = resolve_sender(&store, conversation.id, Some(&unknown))
            .await
            .unwrap();
        assert_eq!(resolved, Some(alice.clone()));

        let resolved = resolve_sender(&store, conversation.id, None).await.unwrap();
        assert_eq!(resolved, Some(alice));
    }

    #[tokio::test]
    async fn test_resolve_sender_without_participants() {
        let store = MemoryStore::new();
        let conversation = store.seed_conversation(&[]).await;

        let resolved = resolve_sender(&store, conversation.id, None).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_handle_inbound_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.seed_user("alice").await;
        let conversation = store.seed_conversation(&[alice.id]).await;
        let state = state_with(&store);

        let (tx, mut rx) = mpsc::channel(8);
        state.hub.join(conversation.id, tx);

        let message = handle_inbound(
            &state,
            conversation.id,
            r#"{"message":"hi","client_message_id":"c-9"}"#,
        )
        .await
        .unwrap();

        assert_eq!(message.sender_id, Some(alice.id));
        assert!(!message.is_ai);
        assert_eq!(store.messages().await, vec![message.clone()]);

        let ServerEvent::Chat(event) = rx.recv().await.unwrap() else {
            panic!("expected chat event");
        };
        assert_eq!(event.message, "hi");
        assert_eq!(event.sender, "alice");
        assert!(!event.is_ai);
        assert_eq!(event.id, Some(message.id));
        assert_eq!(event.client_message_id.as_deref(), Some("c-9"));
    }

    #[tokio::test]
    async fn test_guest_sender_when_nobody_participates() {
        let store = Arc::new(MemoryStore::new());
        let conversation = store.seed_conversation(&[]).await;
        let state = state_with(&store);
        let (tx, mut rx) = mpsc::channel(8);
        state.hub.join(conversation.id, tx);

        let message = handle_inbound(&state, conversation.id, r#"{"message":"anyone?"}"#)
            .await
            .unwrap();

        assert_eq!(message.sender_id, None);
        let ServerEvent::Chat(event) = rx.recv().await.unwrap() else {
            panic!("expected chat event");
        };
        assert_eq!(event.sender, GUEST_SENDER);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_rejected_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let conversation = store.seed_conversation(&[]).await;
        let state = state_with(&store);
        let (tx, mut rx) = mpsc::channel(8);
        state.hub.join(conversation.id, tx);

        let err = handle_inbound(&state, conversation.id, r#"{"text":"hi"}"#)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "malformed_message");
        assert!(store.messages().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_a_persistence_failure() {
        let store = Arc::new(MemoryStore::new());
        let state = state_with(&store);

        let err = handle_inbound(&state, 404, r#"{"message":"hi"}"#)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "persistence_failed");
        assert!(store.messages().await.is_empty());
    }
}
