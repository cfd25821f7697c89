//! Shopchat Server
//!
//! Real-time chat for a storefront assistant. Customer messages are
//! persisted and broadcast to the conversation, forwarded with store
//! context to an automation webhook, and the webhook's reply is delivered
//! back as paced typing and written events.

pub mod api;
pub mod assistant;
pub mod chat;
pub mod config;
pub mod db;
pub mod ws;
