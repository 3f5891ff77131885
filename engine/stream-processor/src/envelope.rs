//! Wire decoding of broker messages into event envelopes

use crate::error::DecodeError;
use serde_json::{Map, Value};
use std::fmt;

/// The closed set of event kinds this consumer aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PageView,
    ProductInteraction,
    OrderCompleted,
    SearchQuery,
}

impl EventKind {
    /// Every kind with a registered handler
    pub const ALL: [EventKind; 4] = [
        EventKind::PageView,
        EventKind::ProductInteraction,
        EventKind::OrderCompleted,
        EventKind::SearchQuery,
    ];

    /// Map a wire tag to a kind; unknown tags return `None`
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "page_view" => Some(EventKind::PageView),
            "product_interaction" => Some(EventKind::ProductInteraction),
            "order_completed" => Some(EventKind::OrderCompleted),
            "search_query" => Some(EventKind::SearchQuery),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::ProductInteraction => "product_interaction",
            EventKind::OrderCompleted => "order_completed",
            EventKind::SearchQuery => "search_query",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A decoded event message
///
/// Envelopes are transient: built per message, dropped after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Raw type tag as received (`type`, falling back to `event_type`)
    pub tag: Option<String>,

    /// Idempotency key, when the producer supplied one
    pub event_id: Option<String>,

    /// Type-specific fields
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Decode a raw broker payload
    ///
    /// Accepts a JSON object. Type-specific fields are the top-level fields;
    /// a nested `payload` object contributes only keys the top level lacks.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(DecodeError::NotAnObject(json_kind(&other))),
        };

        let tag = string_field(&object, "type").or_else(|| string_field(&object, "event_type"));
        let event_id = object.get("event_id").and_then(event_id_from_value);

        if matches!(object.get("payload"), Some(Value::Object(_))) {
            if let Some(Value::Object(nested)) = object.remove("payload") {
                for (key, value) in nested {
                    object.entry(key).or_insert(value);
                }
            }
        }

        Ok(Self { tag, event_id, payload: object })
    }

    /// The handler kind for this envelope, if the tag is known
    pub fn kind(&self) -> Option<EventKind> {
        self.tag.as_deref().and_then(EventKind::from_tag)
    }

    /// Tag for log lines; `<missing>` when the producer sent none
    pub fn tag_or_missing(&self) -> &str {
        self.tag.as_deref().unwrap_or("<missing>")
    }
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn event_id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_flat_envelope() {
        let envelope =
            Envelope::decode(br#"{"type":"page_view","event_id":"e-1","page":"/home"}"#).unwrap();
        assert_eq!(envelope.kind(), Some(EventKind::PageView));
        assert_eq!(envelope.event_id.as_deref(), Some("e-1"));
        assert_eq!(envelope.payload.get("page"), Some(&json!("/home")));
    }

    #[test]
    fn test_event_type_fallback() {
        let envelope = Envelope::decode(br#"{"event_type":"search_query","query":"x"}"#).unwrap();
        assert_eq!(envelope.kind(), Some(EventKind::SearchQuery));
        assert!(envelope.event_id.is_none());
    }

    #[test]
    fn test_type_wins_over_event_type() {
        let envelope =
            Envelope::decode(br#"{"type":"page_view","event_type":"search_query"}"#).unwrap();
        assert_eq!(envelope.kind(), Some(EventKind::PageView));
    }

    #[test]
    fn test_nested_payload() {
        let envelope = Envelope::decode(
            br#"{"type":"order_completed","event_id":7,"payload":{"amount":12.5}}"#,
        )
        .unwrap();
        assert_eq!(envelope.event_id.as_deref(), Some("7"));
        assert_eq!(envelope.payload.get("amount"), Some(&json!(12.5)));
        assert!(envelope.payload.get("payload").is_none());
    }

    #[test]
    fn test_unrelated_data_object_keeps_flat_fields() {
        let envelope = Envelope::decode(
            br#"{"type":"page_view","page":"/checkout","data":{"ab_variant":"B"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.payload.get("page"), Some(&json!("/checkout")));
        assert_eq!(envelope.payload.get("data"), Some(&json!({"ab_variant": "B"})));
    }

    #[test]
    fn test_nested_payload_does_not_override_top_level() {
        let envelope = Envelope::decode(
            br#"{"type":"page_view","page":"/cart","payload":{"page":"/other","referrer":"ad"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.payload.get("page"), Some(&json!("/cart")));
        assert_eq!(envelope.payload.get("referrer"), Some(&json!("ad")));
    }

    #[test]
    fn test_missing_type_is_not_an_error() {
        let envelope = Envelope::decode(br#"{"page":"/x"}"#).unwrap();
        assert!(envelope.tag.is_none());
        assert!(envelope.kind().is_none());
        assert_eq!(envelope.tag_or_missing(), "<missing>");
    }

    #[test]
    fn test_unknown_type_has_no_kind() {
        let envelope = Envelope::decode(br#"{"type":"future_event_xyz"}"#).unwrap();
        assert_eq!(envelope.tag.as_deref(), Some("future_event_xyz"));
        assert!(envelope.kind().is_none());
    }

    #[test]
    fn test_empty_event_id_is_absent() {
        let envelope = Envelope::decode(br#"{"type":"page_view","event_id":""}"#).unwrap();
        assert!(envelope.event_id.is_none());
    }

    #[test]
    fn test_malformed_and_non_object_rejected() {
        assert!(matches!(Envelope::decode(b"{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(Envelope::decode(b"[1,2]"), Err(DecodeError::NotAnObject("array"))));
        assert!(matches!(Envelope::decode(b"\"hi\""), Err(DecodeError::NotAnObject("string"))));
    }

    #[test]
    fn test_tags_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_tag(kind.as_tag()), Some(kind));
        }
    }
}
