//! Seal command: build an encrypted transport payload.

use anyhow::{bail, Context, Result};
use pusher_events_core::{crypto, DecryptionKey};
use pusher_events_types::{
    is_encrypted_channel, CHANNEL_FIELD, DATA_FIELD, ENCRYPTED_CHANNEL_PREFIX, EVENT_FIELD,
    USER_ID_FIELD,
};
use serde_json::{Map, Value};

/// Print one sealed payload as a JSON line.
pub fn run(
    key: &str,
    channel: &str,
    event: &str,
    user_id: Option<&str>,
    plaintext: &str,
) -> Result<()> {
    let payload = sealed_payload(key, channel, event, user_id, plaintext)?;
    println!("{}", Value::Object(payload));
    Ok(())
}

/// Encrypt `plaintext` under `key` and wrap it the way the transport delivers it.
fn sealed_payload(
    key: &str,
    channel: &str,
    event: &str,
    user_id: Option<&str>,
    plaintext: &str,
) -> Result<Map<String, Value>> {
    if !is_encrypted_channel(channel) {
        bail!(
            "Channel '{}' is not an encrypted channel (expected prefix '{}')",
            channel,
            ENCRYPTED_CHANNEL_PREFIX
        );
    }

    let secret = DecryptionKey::from(key)
        .decode()
        .context("Key is not valid base64")?;
    let envelope = crypto::seal_envelope(&secret, plaintext.as_bytes())
        .context("Failed to encrypt message")?;

    let mut payload = Map::new();
    payload.insert(EVENT_FIELD.to_string(), Value::from(event));
    payload.insert(CHANNEL_FIELD.to_string(), Value::from(channel));
    payload.insert(DATA_FIELD.to_string(), Value::from(envelope.to_json()));
    if let Some(user_id) = user_id {
        payload.insert(USER_ID_FIELD.to_string(), Value::from(user_id));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pusher_events_core::{EventParser, PayloadParser, KEY_SIZE};

    const CHANNEL: &str = "private-encrypted-room";

    #[test]
    fn sealed_payload_opens_with_same_key() {
        let key = DecryptionKey::from_bytes(&[7; KEY_SIZE]);
        let payload = sealed_payload(key.as_str(), CHANNEL, "message", Some("u1"), "hi").unwrap();

        let event = PayloadParser::new().parse(&payload, Some(&key)).unwrap();

        assert_eq!(event.event_name(), "message");
        assert_eq!(event.channel_name(), Some(CHANNEL));
        assert_eq!(event.data(), Some("hi"));
        assert_eq!(event.user_id(), Some("u1"));
    }

    #[test]
    fn user_id_is_omitted_when_not_given() {
        let key = DecryptionKey::from_bytes(&[7; KEY_SIZE]);
        let payload = sealed_payload(key.as_str(), CHANNEL, "message", None, "hi").unwrap();

        assert!(!payload.contains_key(USER_ID_FIELD));
    }

    #[test]
    fn rejects_unencrypted_channel() {
        let key = DecryptionKey::from_bytes(&[7; KEY_SIZE]);
        let err = sealed_payload(key.as_str(), "private-room", "message", None, "hi").unwrap_err();

        assert!(err.to_string().contains("not an encrypted channel"));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(sealed_payload("%%%", CHANNEL, "message", None, "hi").is_err());

        let short = DecryptionKey::from_bytes(&[7; 16]);
        assert!(sealed_payload(short.as_str(), CHANNEL, "message", None, "hi").is_err());
    }
}
