//! Chat Service
//!
//! Conversations, their messages and inbound chat frames.

mod conversations;
pub mod inbound;

use axum::{routing::get, Router};

use crate::api::AppState;

pub use conversations::{ConversationResponse, MessageResponse};

/// Create conversations router.
pub fn conversations_router() -> Router<AppState> {
    Router::new()
        .route("/", get(conversations::list))
        .route("/{id}", get(conversations::get))
        .route(
            "/{id}/messages",
            get(conversations::list_messages).post(conversations::create_message),
        )
}
