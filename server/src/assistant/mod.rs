//! Storefront Assistant
//!
//! Reply pipeline for the automation webhook: the outbound context, the
//! webhook call, normalization of its loosely structured reply and paced
//! delivery of the resulting events into the conversation.

mod context;
mod delivery;
mod normalize;
mod types;
mod webhook;

pub use context::{OutboundContext, StoreContext};
pub use delivery::{DeliveryScheduler, Pacing};
pub use normalize::normalize;
pub use types::{Attachment, ItemType, MessageEvent, MessageKind, StructuredItem};
pub use webhook::{WebhookError, WebhookInvoker};
