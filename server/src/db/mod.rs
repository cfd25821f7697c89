//! Database Layer
//!
//! Conversation and message storage behind the [`MessageStore`] contract,
//! backed by `PostgreSQL` in production and memory in tests.

mod memory;
mod models;
mod queries;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
pub use memory::MemoryStore;
pub use models::*;
pub use queries::PgStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

/// Errors returned by a [`MessageStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced conversation does not exist.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    /// Storage backend failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Create/read contract for conversations and messages.
///
/// Messages are append-only: the contract has no update or delete.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Look up a conversation by ID.
    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError>;

    /// List all conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    /// List the participants of a conversation in join order.
    async fn list_participants(&self, conversation_id: i64) -> Result<Vec<User>, StoreError>;

    /// Look up a user by ID.
    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Persist a new message and return it with its ID and timestamp.
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// The latest `limit` messages of a conversation, oldest first.
    async fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(20)
        // Prevent hanging requests on pool exhaustion
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
