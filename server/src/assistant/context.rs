//! Outbound Webhook Context
//!
//! Store context sent by the storefront client alongside a chat message,
//! and the payload forwarded to the automation webhook.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::db::Message;

/// Storefront data attached to an inbound chat message.
///
/// Every field is optional on the wire and forwarded to the webhook as
/// received, whatever its JSON type. Missing or `null` lists become `[]`,
/// counts become `0` and shop details become `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreContext {
    #[serde(default = "empty_array", deserialize_with = "array_or_empty")]
    pub products: Value,
    #[serde(default = "zero", deserialize_with = "count_or_zero")]
    pub total_products: Value,
    #[serde(default = "zero", deserialize_with = "count_or_zero")]
    pub total_customers: Value,
    #[serde(default = "zero", deserialize_with = "count_or_zero")]
    pub total_orders: Value,
    #[serde(default = "empty_array", deserialize_with = "array_or_empty")]
    pub locations: Value,
    #[serde(default = "empty_object", deserialize_with = "object_or_empty")]
    pub shop_details: Value,
    #[serde(default = "empty_array", deserialize_with = "array_or_empty")]
    pub shop_faqs: Value,
    #[serde(default)]
    pub shopify_token: Value,
    #[serde(default)]
    pub shopify_domain: Value,
}

impl Default for StoreContext {
    fn default() -> Self {
        Self {
            products: empty_array(),
            total_products: zero(),
            total_customers: zero(),
            total_orders: zero(),
            locations: empty_array(),
            shop_details: empty_object(),
            shop_faqs: empty_array(),
            shopify_token: Value::Null,
            shopify_domain: Value::Null,
        }
    }
}

impl StoreContext {
    /// Number of products, when `products` is a list.
    pub fn product_count(&self) -> usize {
        self.products.as_array().map_or(0, Vec::len)
    }

    /// Whether a non-empty shop token was sent. The token itself is never logged.
    pub fn has_shop_token(&self) -> bool {
        match &self.shopify_token {
            Value::Null => false,
            Value::String(token) => !token.is_empty(),
            _ => true,
        }
    }
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn zero() -> Value {
    Value::from(0)
}

fn or_default<'de, D>(deserializer: D, default: fn() -> Value) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.unwrap_or_else(default))
}

fn array_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    or_default(deserializer, empty_array)
}

fn object_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    or_default(deserializer, empty_object)
}

fn count_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    or_default(deserializer, zero)
}

/// Body of the automation webhook request.
///
/// Built from the persisted user message so nothing mutable is referenced
/// after the turn starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundContext {
    pub id: i64,
    pub conversation_id: i64,
    pub sender: String,
    pub content: String,
    pub is_ai: bool,
    pub timestamp: String,
    #[serde(flatten)]
    pub store: StoreContext,
    pub persona: String,
}

impl OutboundContext {
    pub fn new(message: &Message, sender: &str, store: StoreContext, persona: &str) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender: sender.to_string(),
            content: message.content.clone(),
            is_ai: false,
            timestamp: message.created_at.to_rfc3339(),
            store,
            persona: persona.to_string(),
        }
    }

    /// Serialize once, at trigger time.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
