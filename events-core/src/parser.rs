//! Event parser: raw payload + optional key → canonical event.
//!
//! Parsing is a pure function of its inputs. On encrypted channels the
//! `data` field is opened with the channel's secret-box key, except for
//! system events, whose data always passes through verbatim.
//!
//! Every key-related failure (missing key, malformed key, authentication
//! failure, non-UTF-8 plaintext) surfaces as the same
//! [`ParseError::InvalidDecryptionKey`], so callers apply one retry policy and
//! learn nothing about why decryption failed.

use pusher_events_types::{
    is_encrypted_channel, is_system_event, string_field, CanonicalEvent, EncryptedEnvelope,
    ParseError, RawPayload, CHANNEL_FIELD, DATA_FIELD, EVENT_FIELD, USER_ID_FIELD,
};

use crate::crypto;
use crate::key_store::DecryptionKey;

/// Turns raw payloads into canonical events.
pub trait EventParser: Send + Sync {
    /// Parse a payload, decrypting its data with `key` when required.
    fn parse(
        &self,
        payload: &RawPayload,
        key: Option<&DecryptionKey>,
    ) -> Result<CanonicalEvent, ParseError>;
}

/// Parser for the standard payload shape with secret-box encrypted channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadParser;

impl PayloadParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for PayloadParser {
    fn parse(
        &self,
        payload: &RawPayload,
        key: Option<&DecryptionKey>,
    ) -> Result<CanonicalEvent, ParseError> {
        let event_name = string_field(payload, EVENT_FIELD)
            .ok_or_else(|| ParseError::invalid_format("missing string field 'event'"))?;
        let channel_name = string_field(payload, CHANNEL_FIELD);
        let data = string_field(payload, DATA_FIELD);

        let data = match channel_name {
            Some(channel) if is_encrypted_channel(channel) && !is_system_event(event_name) => {
                decrypt_data(data, key)?
            }
            _ => data.map(str::to_string),
        };

        Ok(CanonicalEvent::new(
            event_name,
            channel_name.map(str::to_string),
            data,
            string_field(payload, USER_ID_FIELD).map(str::to_string),
            payload.clone(),
        ))
    }
}

fn decrypt_data(
    data: Option<&str>,
    key: Option<&DecryptionKey>,
) -> Result<Option<String>, ParseError> {
    let Some(data) = data else {
        return Ok(None);
    };
    let key = key.ok_or(ParseError::InvalidDecryptionKey)?;

    let envelope = EncryptedEnvelope::from_json(data)?;
    let ciphertext = envelope.decode_ciphertext()?;
    let nonce = envelope.decode_nonce()?;
    let secret = key
        .decode()
        .map_err(|_| ParseError::InvalidDecryptionKey)?;

    let plaintext = crypto::open(&secret, &nonce, &ciphertext)
        .map_err(|_| ParseError::InvalidDecryptionKey)?;

    String::from_utf8(plaintext)
        .map(Some)
        .map_err(|_| ParseError::InvalidDecryptionKey)
}
