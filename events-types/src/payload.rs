//! Raw payloads as delivered by the transport.

use serde_json::{Map, Value};

use crate::ParseError;

/// A decoded transport message: string keys mapped to loosely-typed values.
pub type RawPayload = Map<String, Value>;

/// Required field holding the event name.
pub const EVENT_FIELD: &str = "event";
/// Optional field holding the channel name.
pub const CHANNEL_FIELD: &str = "channel";
/// Optional field holding the event data (possibly an encrypted envelope).
pub const DATA_FIELD: &str = "data";
/// Optional field holding the originating user id.
pub const USER_ID_FIELD: &str = "user_id";

/// Decode a transport JSON text into a [`RawPayload`].
///
/// The text must be a JSON object; anything else is a format error.
pub fn payload_from_str(text: &str) -> Result<RawPayload, ParseError> {
    match serde_json::from_str::<Value>(text).map_err(ParseError::invalid_format)? {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::InvalidFormat(format!(
            "expected JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Read a field as a string slice.
///
/// Returns `None` when the field is absent or holds a non-string value.
pub fn string_field<'a>(payload: &'a RawPayload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
