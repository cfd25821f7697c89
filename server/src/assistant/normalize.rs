//! Reply Normalization
//!
//! Turns whatever the automation webhook returned into an ordered list of
//! [`MessageEvent`]s. Accepts a JSON object, a (nested) JSON array, JSON
//! prefixed with `json `, or plain text. Never fails: anything that is not
//! JSON becomes a single written event.

use serde_json::{Map, Value};
use tracing::debug;

use super::types::{Attachment, MessageEvent, MessageKind, StructuredItem};

/// Prefix some automation tools put in front of a JSON body.
const JSON_PREFIX: &str = "json ";

/// Normalize a raw webhook body into reply events, in order.
pub fn normalize(raw: &str) -> Vec<MessageEvent> {
    let body = strip_json_prefix(raw);

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Reply is not JSON, delivering as plain text");
            return vec![MessageEvent::written(raw)];
        }
    };

    let mut events = Vec::new();
    flatten_into(&value, &mut events);
    events
}

fn strip_json_prefix(raw: &str) -> &str {
    match raw.get(..JSON_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(JSON_PREFIX) => &raw[JSON_PREFIX.len()..],
        _ => raw,
    }
}

/// Append the events for one item. Arrays at any depth are flattened.
fn flatten_into(item: &Value, out: &mut Vec<MessageEvent>) {
    match item {
        Value::Array(items) => {
            for sub in items {
                flatten_into(sub, out);
            }
        }
        Value::Object(fields) => out.push(event_from_object(fields)),
        scalar => out.push(MessageEvent::written(coerce_text(scalar))),
    }
}

fn event_from_object(fields: &Map<String, Value>) -> MessageEvent {
    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .map_or(MessageKind::Written, MessageKind::from_tag);

    let mut text = first_truthy(fields, &["message", "text"])
        .map(coerce_text)
        .unwrap_or_default();

    let mut attachments = Vec::new();
    match first_truthy(fields, &["content", "output"]) {
        Some(Value::Array(nested)) => partition_into(nested, &mut attachments),
        // `{"output": "plain text"}` carries its text in the nested field
        Some(nested) if text.is_empty() && is_scalar(nested) => text = coerce_text(nested),
        Some(nested) => partition_into(std::slice::from_ref(nested), &mut attachments),
        None => {}
    }

    MessageEvent {
        text,
        kind,
        attachments,
    }
}

/// Keep structured cards verbatim; flatten everything else into text events.
fn partition_into(nested: &[Value], out: &mut Vec<Attachment>) {
    for element in nested {
        if let Some(item) = StructuredItem::from_value(element) {
            out.push(Attachment::Item(item));
            continue;
        }

        let mut events = Vec::new();
        flatten_into(element, &mut events);
        out.extend(events.into_iter().map(Attachment::Message));
    }
}

fn first_truthy<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| is_truthy(value))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

const fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
