//! Database Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation model.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message model.
///
/// A `None` sender on an `is_ai` message is the synthetic assistant identity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub is_ai: bool,
}

impl NewMessage {
    /// A message written by a conversation participant.
    pub fn from_user(conversation_id: i64, sender_id: Option<i64>, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: content.into(),
            is_ai: false,
        }
    }

    /// A reply written by the assistant.
    pub fn from_assistant(conversation_id: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id: None,
            content: content.into(),
            is_ai: true,
        }
    }
}
