//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod error;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::ApiError;

use crate::{
    assistant::{DeliveryScheduler, WebhookError, WebhookInvoker},
    chat,
    config::Config,
    db::MessageStore,
    ws::{self, ConversationHub},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Conversation and message storage
    pub store: Arc<dyn MessageStore>,
    /// Server configuration
    pub config: Arc<Config>,
    /// Live subscribers per conversation
    pub hub: ConversationHub,
    /// Paced delivery of assistant replies
    pub scheduler: DeliveryScheduler,
    /// Automation webhook (None when the assistant is disabled)
    pub webhook: Option<Arc<WebhookInvoker>>,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Arc<dyn MessageStore>, config: Config) -> Result<Self, WebhookError> {
        let hub = ConversationHub::new();
        let scheduler = DeliveryScheduler::new(
            Arc::clone(&store),
            hub.clone(),
            config.pacing(),
            config.assistant_name.clone(),
        );
        let webhook = WebhookInvoker::from_config(&config)?.map(Arc::new);

        Ok(Self {
            store,
            config: Arc::new(config),
            hub,
            scheduler,
            webhook,
        })
    }

    /// Check if the automation webhook is configured.
    #[must_use]
    pub const fn has_assistant(&self) -> bool {
        self.webhook.is_some()
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Conversations and messages
        .nest("/api/conversations", chat::conversations_router())
        // WebSocket
        .route("/ws/chat/{conversation_id}", get(ws::handler))
        .route("/ws/chat/{conversation_id}/", get(ws::handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether assistant replies are enabled
    assistant: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        assistant: state.has_assistant(),
    })
}
