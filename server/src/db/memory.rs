//! In-memory [`MessageStore`] used by tests and local development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{Conversation, Message, MessageStore, NewMessage, StoreError, User};

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    conversations: BTreeMap<i64, Conversation>,
    participants: BTreeMap<i64, Vec<i64>>,
    messages: Vec<Message>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Wall-clock time, nudged forward so message timestamps strictly increase.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user.
    pub async fn seed_user(&self, username: &str) -> User {
        let mut inner = self.inner.write().await;
        let id = inner.users.len() as i64 + 1;
        let user = User {
            id,
            username: username.to_string(),
            created_at: inner.next_timestamp(),
        };
        inner.users.insert(id, user.clone());
        user
    }

    /// Insert a conversation with the given participants, in join order.
    pub async fn seed_conversation(&self, participants: &[i64]) -> Conversation {
        let mut inner = self.inner.write().await;
        let id = inner.conversations.len() as i64 + 1;
        let now = inner.next_timestamp();
        let conversation = Conversation {
            id,
            created_at: now,
            updated_at: now,
        };
        inner.conversations.insert(id, conversation.clone());
        inner.participants.insert(id, participants.to_vec());
        conversation
    }

    /// Snapshot of every stored message in insertion order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations: Vec<Conversation> = self
            .inner
            .read()
            .await
            .conversations
            .values()
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn list_participants(&self, conversation_id: i64) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        let users = inner
            .participants
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.users.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(users)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::ConversationNotFound(message.conversation_id));
        }

        let created_at = inner.next_timestamp();
        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            conversation.updated_at = created_at;
        }

        let created = Message {
            id: inner.messages.len() as i64 + 1,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            is_ai: message.is_ai,
            created_at,
        };
        inner.messages.push(created.clone());
        Ok(created)
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let matching: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        let skip = matching.len().saturating_sub(limit.max(0) as usize);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}
