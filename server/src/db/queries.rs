//! `PostgreSQL` Queries

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Conversation, Message, MessageStore, NewMessage, StoreError, User};

/// [`MessageStore`] backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgStore {
    #[tracing::instrument(skip(self))]
    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    #[tracing::instrument(skip(self))]
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, created_at, updated_at FROM conversations ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    #[tracing::instrument(skip(self))]
    async fn list_participants(&self, conversation_id: i64) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r"
            SELECT u.id, u.username, u.created_at
            FROM conversation_participants cp
            INNER JOIN users u ON u.id = cp.user_id
            WHERE cp.conversation_id = $1
            ORDER BY cp.joined_at ASC, u.id ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    #[tracing::instrument(skip(self))]
    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user =
            sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    #[tracing::instrument(skip(self, message), fields(conversation_id = message.conversation_id, is_ai = message.is_ai))]
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(message.conversation_id)
            .execute(&mut *tx)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(StoreError::ConversationNotFound(message.conversation_id));
        }

        let created = sqlx::query_as::<_, Message>(
            r"
            INSERT INTO messages (conversation_id, sender_id, content, is_ai)
            VALUES ($1, $2, $3, $4)
            RETURNING id, conversation_id, sender_id, content, is_ai, created_at
            ",
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.is_ai)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(
            r"
            SELECT id, conversation_id, sender_id, content, is_ai, created_at
            FROM (
                SELECT * FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) latest
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
