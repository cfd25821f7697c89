//! Conversation Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    api::{ApiError, AppState},
    db::{self, NewMessage},
    ws::ChatEvent,
};

use super::inbound::{resolve_sender, GUEST_SENDER};

/// Messages returned when no limit is given.
const DEFAULT_LIMIT: i64 = 50;
/// Largest page a client may ask for.
const MAX_LIMIT: i64 = 200;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub participant_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub id: i64,
    pub username: String,
}

impl From<db::User> for ParticipantResponse {
    fn from(user: db::User) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: i64,
    pub participants: Vec<ParticipantResponse>,
    pub messages: Vec<MessageResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

impl From<db::Message> for MessageResponse {
    fn from(msg: db::Message) -> Self {
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            content: msg.content,
            is_ai: msg.is_ai,
            created_at: msg.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Content must be 1-4000 characters"))]
    pub content: String,
    #[serde(default)]
    pub is_ai: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List conversations, most recently active first.
/// GET /api/conversations
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = state.store.list_conversations().await?;

    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let participant_ids = state
            .store
            .list_participants(conversation.id)
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();
        summaries.push(ConversationSummary {
            id: conversation.id,
            participant_ids,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        });
    }

    Ok(Json(summaries))
}

/// Get a conversation with its participants and latest messages.
/// GET /api/conversations/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation = state
        .store
        .find_conversation(id)
        .await?
        .ok_or(ApiError::ConversationNotFound(id))?;

    let participants = state.store.list_participants(id).await?;
    let messages = state.store.list_messages(id, DEFAULT_LIMIT).await?;

    Ok(Json(ConversationResponse {
        id: conversation.id,
        participants: participants.into_iter().map(Into::into).collect(),
        messages: messages.into_iter().map(Into::into).collect(),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    }))
}

/// List the latest messages of a conversation, oldest first.
/// GET /api/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    state
        .store
        .find_conversation(id)
        .await?
        .ok_or(ApiError::ConversationNotFound(id))?;

    let limit = query.limit.clamp(1, MAX_LIMIT);
    let messages = state.store.list_messages(id, limit).await?;

    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

/// Post a message without involving the assistant.
/// POST /api/conversations/{id}/messages
pub async fn create_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    body.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("Content must not be blank".into()));
    }

    state
        .store
        .find_conversation(id)
        .await?
        .ok_or(ApiError::ConversationNotFound(id))?;

    let (new_message, sender_name) = if body.is_ai {
        (
            NewMessage::from_assistant(id, body.content),
            state.config.assistant_name.clone(),
        )
    } else {
        let sender = resolve_sender(state.store.as_ref(), id, None).await?;
        let sender_name = sender
            .as_ref()
            .map_or_else(|| GUEST_SENDER.to_string(), |user| user.username.clone());
        (
            NewMessage::from_user(id, sender.map(|user| user.id), body.content),
            sender_name,
        )
    };

    let message = state.store.create_message(new_message).await?;

    let event = if message.is_ai {
        ChatEvent::assistant_reply(&message, &sender_name, Vec::new())
    } else {
        ChatEvent::user_message(&message, &sender_name, None)
    };
    state.hub.publish(id, &event);

    info!(conversation_id = id, message_id = message.id, is_ai = message.is_ai, "Message created");

    Ok((StatusCode::CREATED, Json(message.into())))
}
