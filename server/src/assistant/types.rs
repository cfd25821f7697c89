//! Assistant Reply Types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a reply event is presented to the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A persisted chat message.
    #[default]
    Written,
    /// An ephemeral "assistant is typing" indicator.
    Typing,
}

impl MessageKind {
    /// Map an external `type` tag; anything unrecognized is `Written`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "typing" => Self::Typing,
            _ => Self::Written,
        }
    }
}

/// One normalized reply event.
///
/// Serializes in the automation system's canonical shape:
/// `{"message": ..., "type": ..., "content": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    #[serde(rename = "message")]
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "content", skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl MessageEvent {
    pub fn written(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Written,
            attachments: Vec::new(),
        }
    }

    pub fn typing(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Typing,
            attachments: Vec::new(),
        }
    }
}

/// Content nested under a reply event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Attachment {
    /// A product, page or category card, passed through verbatim.
    Item(StructuredItem),
    /// A text event flattened out of nested content.
    Message(MessageEvent),
}

/// Known structured card types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Product,
    Page,
    Category,
}

impl ItemType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "product" => Some(Self::Product),
            "page" => Some(Self::Page),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

/// Opaque structured card. Only the `type` tag is ever inspected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StructuredItem(Map<String, Value>);

impl StructuredItem {
    /// Wrap `value` if it is an object tagged with a known [`ItemType`].
    pub fn from_value(value: &Value) -> Option<Self> {
        let fields = value.as_object()?;
        let tag = fields.get("type")?.as_str()?;
        ItemType::from_tag(tag)?;
        Some(Self(fields.clone()))
    }

    pub fn item_type(&self) -> Option<ItemType> {
        self.0
            .get("type")
            .and_then(Value::as_str)
            .and_then(ItemType::from_tag)
    }

    /// The card exactly as received.
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}
