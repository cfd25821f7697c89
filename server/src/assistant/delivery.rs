//! Reply Delivery
//!
//! Paces normalized reply events like a human typist, persists written
//! replies and publishes every event to the conversation.
//!
//! Architecture:
//! - Each conversation with pending replies owns one worker task fed by an
//!   unbounded channel of event batches. Batches and the events inside them
//!   are played strictly in order.
//! - Workers live in a `DashMap` keyed by conversation. A worker deregisters
//!   itself only while holding the map entry and only if its queue is empty,
//!   and `deliver` enqueues while holding the same entry, so no batch can
//!   slip into a queue that is about to be dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info};

use super::types::{MessageEvent, MessageKind};
use crate::db::{MessageStore, NewMessage};
use crate::ws::{ChatEvent, ConversationHub};

type Batch = Vec<MessageEvent>;

/// Timing policy for assistant replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Pause after showing a typing indicator.
    pub typing_pause: Duration,
    /// Simulated typing time per character of a written reply.
    pub per_char: Duration,
    /// Cap of the per-character part of the delay.
    pub max_typing: Duration,
    /// Lower bound of the random jitter added to every written reply.
    pub jitter_min: Duration,
    /// Upper bound of the random jitter.
    pub jitter_max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            typing_pause: Duration::from_millis(1500),
            per_char: Duration::from_millis(50),
            max_typing: Duration::from_secs(3),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1500),
        }
    }
}

impl Pacing {
    /// No delays at all.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            typing_pause: Duration::ZERO,
            per_char: Duration::ZERO,
            max_typing: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Capped, length-proportional part of the delay.
    pub fn typing_time(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.per_char.saturating_mul(chars).min(self.max_typing)
    }

    /// Full delay before a written reply appears.
    pub fn written_delay(&self, text: &str) -> Duration {
        self.typing_time(text) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if self.jitter_min >= self.jitter_max {
            return self.jitter_min;
        }
        rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
    }
}

/// Per-conversation sequential reply delivery.
///
/// Cloning is cheap and shares the workers.
#[derive(Clone)]
pub struct DeliveryScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    hub: ConversationHub,
    pacing: Pacing,
    assistant_name: String,
    workers: DashMap<i64, mpsc::UnboundedSender<Batch>>,
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        hub: ConversationHub,
        pacing: Pacing,
        assistant_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                hub,
                pacing,
                assistant_name: assistant_name.into(),
                workers: DashMap::new(),
            }),
        }
    }

    /// Queue a batch of reply events for a conversation and return at once.
    ///
    /// Batches for the same conversation are delivered one after another in
    /// the order they were queued.
    pub fn deliver(&self, conversation_id: i64, events: Vec<MessageEvent>) {
        if events.is_empty() {
            debug!(conversation_id, "No reply events to deliver");
            return;
        }

        match self.inner.workers.entry(conversation_id) {
            Entry::Occupied(mut entry) => {
                // A send only fails if the worker died without deregistering
                if let Err(mpsc::error::SendError(events)) = entry.get().send(events) {
                    error!(conversation_id, "Delivery worker vanished, restarting");
                    entry.insert(self.spawn_worker(conversation_id, events));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_worker(conversation_id, events));
            }
        }
    }

    /// Number of conversations with a running delivery worker.
    pub fn active_workers(&self) -> usize {
        self.inner.workers.len()
    }

    /// Play events in order on the current task: skip empty ones, pace,
    /// persist written replies and publish.
    pub async fn deliver_sequence(&self, conversation_id: i64, events: Vec<MessageEvent>) {
        self.inner.deliver_sequence(conversation_id, events).await;
    }

    fn spawn_worker(&self, conversation_id: i64, first: Batch) -> mpsc::UnboundedSender<Batch> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Cannot fail: the receiver is alive until the worker exits
        let _ = tx.send(first);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_worker(conversation_id, rx).await;
        });

        debug!(conversation_id, "Delivery worker started");
        tx
    }
}

impl Inner {
    async fn run_worker(&self, conversation_id: i64, mut rx: mpsc::UnboundedReceiver<Batch>) {
        loop {
            match rx.try_recv() {
                Ok(batch) => self.deliver_sequence(conversation_id, batch).await,
                Err(TryRecvError::Empty) => {
                    let removed = self
                        .workers
                        .remove_if(&conversation_id, |_, _| rx.is_empty());
                    // Not removed with an empty queue means the entry is not ours
                    if removed.is_some() || rx.is_empty() {
                        break;
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }

        debug!(conversation_id, "Delivery worker finished");
    }

    async fn deliver_sequence(&self, conversation_id: i64, events: Batch) {
        let total = events.len();
        for event in events {
            self.deliver_event(conversation_id, event).await;
        }
        info!(conversation_id, total, "Reply sequence delivered");
    }

    async fn deliver_event(&self, conversation_id: i64, event: MessageEvent) {
        if event.text.is_empty() {
            debug!(conversation_id, kind = ?event.kind, "Skipping empty reply event");
            return;
        }

        match event.kind {
            MessageKind::Typing => {
                self.hub.publish(
                    conversation_id,
                    &ChatEvent::typing(&self.assistant_name, event.text),
                );
                tokio::time::sleep(self.pacing.typing_pause).await;
            }
            MessageKind::Written => {
                tokio::time::sleep(self.pacing.written_delay(&event.text)).await;

                let new_message = NewMessage::from_assistant(conversation_id, event.text);
                match self.store.create_message(new_message).await {
                    Ok(message) => {
                        self.hub.publish(
                            conversation_id,
                            &ChatEvent::assistant_reply(
                                &message,
                                &self.assistant_name,
                                event.attachments,
                            ),
                        );
                    }
                    Err(e) => {
                        error!(
                            conversation_id,
                            error = %e,
                            "Failed to persist assistant reply, dropping it"
                        );
                    }
                }
            }
        }
    }
}
