//! Automation Webhook Invoker
//!
//! Posts the turn's context to the automation webhook on a background task
//! and feeds a successful reply through normalization into the
//! conversation's delivery worker. One attempt per turn: every failure is
//! logged and ends the turn without a reply.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::OutboundContext;
use super::delivery::DeliveryScheduler;
use super::normalize::normalize;
use crate::config::Config;

/// Characters of an error body kept in logs.
const BODY_PREVIEW_CHARS: usize = 200;

/// Webhook call failures.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook timed out after {0:?}")]
    Timeout(Duration),

    #[error("Webhook transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Webhook returned HTTP {status}: {body_preview}")]
    Status { status: u16, body_preview: String },

    #[error("Webhook returned an empty body")]
    EmptyBody,

    #[error("Failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Client for the automation webhook.
#[derive(Debug, Clone)]
pub struct WebhookInvoker {
    client: reqwest::Client,
    url: String,
    key_header: String,
    secret: Option<String>,
    timeout: Duration,
}

impl WebhookInvoker {
    pub fn new(
        url: impl Into<String>,
        key_header: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WebhookError::Transport)?;

        Ok(Self {
            client,
            url: url.into(),
            key_header: key_header.into(),
            secret,
            timeout,
        })
    }

    /// Build from configuration; `None` when no webhook URL is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, WebhookError> {
        config
            .webhook_url
            .as_ref()
            .map(|url| {
                Self::new(
                    url.clone(),
                    config.webhook_key_header.clone(),
                    config.webhook_secret.clone(),
                    config.webhook_timeout(),
                )
            })
            .transpose()
    }

    /// POST a serialized context and return the raw reply body.
    pub async fn call(&self, body: Vec<u8>) -> Result<String, WebhookError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(secret) = &self.secret {
            let prefix: String = secret.chars().take(3).collect();
            debug!(url = %self.url, key_prefix = %format!("{prefix}...***"), "Calling automation webhook");
            request = request.header(self.key_header.as_str(), secret.as_str());
        } else {
            debug!(url = %self.url, "Calling automation webhook without API key");
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body_preview: text.chars().take(BODY_PREVIEW_CHARS).collect(),
            });
        }

        if text.trim().is_empty() {
            return Err(WebhookError::EmptyBody);
        }

        Ok(text)
    }

    /// Fire the webhook for one turn without blocking the caller.
    ///
    /// The context is serialized before the task starts. On success the
    /// reply is normalized and queued on the conversation's delivery worker.
    pub fn invoke(
        self: &Arc<Self>,
        context: &OutboundContext,
        scheduler: &DeliveryScheduler,
    ) -> JoinHandle<()> {
        let conversation_id = context.conversation_id;
        let message_id = context.id;
        let body = context.to_body();
        let invoker = Arc::clone(self);
        let scheduler = scheduler.clone();

        tokio::spawn(async move {
            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    error!(conversation_id, message_id, error = %e, "Failed to serialize webhook payload");
                    return;
                }
            };

            match invoker.call(body).await {
                Ok(raw) => {
                    let events = normalize(&raw);
                    info!(
                        conversation_id,
                        message_id,
                        reply_chars = raw.chars().count(),
                        events = events.len(),
                        "Automation reply received"
                    );
                    scheduler.deliver(conversation_id, events);
                }
                Err(e) => {
                    warn!(
                        conversation_id,
                        message_id,
                        error = %e,
                        "Automation webhook failed, no reply for this turn"
                    );
                }
            }
        })
    }

    fn classify(&self, error: reqwest::Error) -> WebhookError {
        if error.is_timeout() {
            WebhookError::Timeout(self.timeout)
        } else {
            WebhookError::Transport(error)
        }
    }
}
