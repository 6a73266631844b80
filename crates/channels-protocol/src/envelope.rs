//! Application envelope carried in text frames: `{"event": ..., "data": ...}`.

use serde::Serialize;
use serde_json::{json, Value};

/// Event name used when a payload is not a well-formed event object.
pub const DEFAULT_EVENT: &str = "message";

/// Event name and data parsed from one inbound text payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    /// `false` when the fallback envelope was synthesized.
    pub well_formed: bool,
}

impl Envelope {
    /// Parse a text payload.
    ///
    /// A JSON object with a string `event` yields that event and its `data`
    /// (`{}` when absent). Anything else yields the fallback
    /// `{event: "message", data: {text: <raw>}}`. Never fails.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(mut object)) => match object.remove("event") {
                Some(Value::String(event)) => Self {
                    event,
                    data: object.remove("data").unwrap_or_else(|| json!({})),
                    well_formed: true,
                },
                _ => Self::fallback(raw),
            },
            _ => Self::fallback(raw),
        }
    }

    pub fn fallback(raw: &str) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: json!({ "text": raw }),
            well_formed: false,
        }
    }
}

/// Outbound event, serialized as `{"event": <event>, "data": <data>}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEvent<'a> {
    pub event: &'a str,
    pub data: &'a Value,
}

impl<'a> OutgoingEvent<'a> {
    pub fn new(event: &'a str, data: &'a Value) -> Self {
        Self { event, data }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_event_object() {
        let env = Envelope::parse(r#"{"event":"chat","data":{"text":"hi","n":3}}"#);
        assert_eq!(env.event, "chat");
        assert_eq!(env.data, json!({"text": "hi", "n": 3}));
        assert!(env.well_formed);
    }

    #[test]
    fn missing_data_defaults_to_empty_object() {
        let env = Envelope::parse(r#"{"event":"ping"}"#);
        assert_eq!(env.event, "ping");
        assert_eq!(env.data, json!({}));
    }

    #[test]
    fn data_may_be_any_json_value() {
        let env = Envelope::parse(r#"{"event":"list","data":[1,null,"x"]}"#);
        assert_eq!(env.data, json!([1, null, "x"]));
    }

    #[test]
    fn plain_text_falls_back() {
        let env = Envelope::parse("hello there");
        assert_eq!(env.event, DEFAULT_EVENT);
        assert_eq!(env.data, json!({"text": "hello there"}));
        assert!(!env.well_formed);
    }

    #[test]
    fn object_without_event_falls_back() {
        let raw = r#"{"data":{"a":1}}"#;
        let env = Envelope::parse(raw);
        assert_eq!(env.event, "message");
        assert_eq!(env.data, json!({"text": raw}));
    }

    #[test]
    fn non_string_event_falls_back() {
        let env = Envelope::parse(r#"{"event":42}"#);
        assert_eq!(env.event, "message");
        assert!(!env.well_formed);
    }

    #[test]
    fn non_object_json_falls_back() {
        assert!(!Envelope::parse("[1,2,3]").well_formed);
        assert!(!Envelope::parse("\"event\"").well_formed);
    }

    #[test]
    fn outgoing_event_field_order() {
        let data = json!({});
        let text = OutgoingEvent::new("pong", &data).to_text().unwrap();
        assert_eq!(text, r#"{"event":"pong","data":{}}"#);
    }
}
