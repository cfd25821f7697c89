//! Conversation Hub
//!
//! In-process registry of the live connections subscribed to each
//! conversation, and fan-out of chat events to them. Lock-sharded via
//! `DashMap` so joins, leaves and publishes on different conversations
//! never contend.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChatEvent, ServerEvent};

type Subscribers = HashMap<Uuid, mpsc::Sender<ServerEvent>>;

/// Shared subscriber registry. Cloning is cheap and shares the registry.
#[derive(Clone, Default)]
pub struct ConversationHub {
    conversations: Arc<DashMap<i64, Subscribers>>,
}

impl ConversationHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection's outbound queue to a conversation.
    pub fn join(&self, conversation_id: i64, sender: mpsc::Sender<ServerEvent>) -> Uuid {
        let subscriber_id = Uuid::now_v7();
        self.conversations
            .entry(conversation_id)
            .or_default()
            .insert(subscriber_id, sender);

        debug!(conversation_id, subscriber = %subscriber_id, "Subscriber joined");
        subscriber_id
    }

    /// Remove a subscriber. Empty conversations are dropped from the registry.
    pub fn leave(&self, conversation_id: i64, subscriber_id: Uuid) {
        if let Some(mut subscribers) = self.conversations.get_mut(&conversation_id) {
            subscribers.remove(&subscriber_id);
        }
        self.conversations
            .remove_if(&conversation_id, |_, subscribers| subscribers.is_empty());

        debug!(conversation_id, subscriber = %subscriber_id, "Subscriber left");
    }

    /// Fan an event out to every current subscriber of a conversation.
    ///
    /// Returns how many subscribers accepted the event. Subscribers whose
    /// connection has gone away are pruned. A subscriber whose outbound
    /// queue is full is lagging and gets disconnected instead of silently
    /// missing the event; it can refetch history after reconnecting.
    pub fn publish(&self, conversation_id: i64, event: &ChatEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        if let Some(subscribers) = self.conversations.get(&conversation_id) {
            for (id, sender) in subscribers.iter() {
                match sender.try_send(ServerEvent::Chat(event.clone())) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(conversation_id, subscriber = %id, "Subscriber queue full, disconnecting lagging subscriber");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }

        for id in dropped {
            self.leave(conversation_id, id);
        }

        debug!(conversation_id, delivered, msg_type = ?event.msg_type, "Published chat event");
        delivered
    }

    /// Number of live subscribers of a conversation.
    pub fn subscriber_count(&self, conversation_id: i64) -> usize {
        self.conversations
            .get(&conversation_id)
            .map_or(0, |subscribers| subscribers.len())
    }
}
