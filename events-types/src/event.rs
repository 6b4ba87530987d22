//! CanonicalEvent - the parsed form of a raw payload.

use serde::Serialize;
use serde_json::Value;

use crate::{is_system_event, RawPayload};

/// An event ready for dispatch.
///
/// `data` holds the plaintext when the event arrived on an encrypted channel,
/// otherwise the transport's `data` string unchanged. The original payload is
/// kept for callers that need fields beyond the canonical ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    #[serde(rename = "event")]
    event_name: String,
    #[serde(rename = "channel", skip_serializing_if = "Option::is_none")]
    channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip)]
    raw: RawPayload,
}

impl CanonicalEvent {
    /// Create a new event.
    pub fn new(
        event_name: impl Into<String>,
        channel_name: Option<String>,
        data: Option<String>,
        user_id: Option<String>,
        raw: RawPayload,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            channel_name,
            data,
            user_id,
            raw,
        }
    }

    /// Name of the event.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Channel the event was published on, if any.
    pub fn channel_name(&self) -> Option<&str> {
        self.channel_name.as_deref()
    }

    /// Event data (decrypted plaintext on encrypted channels).
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Id of the user that triggered the event, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Look up any field of the original payload.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Parse `data` as JSON.
    ///
    /// Returns `None` when there is no data or it is not valid JSON.
    pub fn data_json(&self) -> Option<Value> {
        self.data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
    }

    /// Whether this is an internal protocol event.
    pub fn is_system_event(&self) -> bool {
        is_system_event(&self.event_name)
    }

    /// The original payload.
    pub fn raw(&self) -> &RawPayload {
        &self.raw
    }

    /// Consume the event and return the original payload.
    pub fn into_raw(self) -> RawPayload {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload_from_str;

    fn make_event(data: Option<&str>) -> CanonicalEvent {
        let raw = payload_from_str(r#"{"event":"message","channel":"room","extra":true}"#).unwrap();
        CanonicalEvent::new(
            "message",
            Some("room".to_string()),
            data.map(str::to_string),
            None,
            raw,
        )
    }

    #[test]
    fn accessors_return_fields() {
        let event = make_event(Some("hello"));

        assert_eq!(event.event_name(), "message");
        assert_eq!(event.channel_name(), Some("room"));
        assert_eq!(event.data(), Some("hello"));
        assert_eq!(event.user_id(), None);
        assert!(!event.is_system_event());
    }

    #[test]
    fn property_reads_raw_payload() {
        let event = make_event(None);

        assert_eq!(event.property("extra"), Some(&Value::Bool(true)));
        assert_eq!(event.property("missing"), None);
        assert_eq!(event.into_raw().len(), 3);
    }

    #[test]
    fn data_json_parses_json_data() {
        let event = make_event(Some(r#"{"text":"hi"}"#));
        assert_eq!(event.data_json().unwrap()["text"], "hi");

        assert!(make_event(Some("not json")).data_json().is_none());
        assert!(make_event(None).data_json().is_none());
    }

    #[test]
    fn serializes_without_raw_payload() {
        let event = make_event(Some("hello"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"event": "message", "channel": "room", "data": "hello"})
        );
    }
}
