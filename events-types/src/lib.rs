//! # events-types
//!
//! Wire format types for channel-based event delivery with end-to-end
//! encrypted channels.
//!
//! This crate provides the foundational types shared by the pipeline crates:
//! - [`RawPayload`] - Loosely-typed payload as handed over by the transport
//! - [`CanonicalEvent`] - Parsed, possibly decrypted event
//! - [`EncryptedEnvelope`] - Nonce + ciphertext structure carried in `data`
//! - [`ParseError`] - Error types
//! - Channel and event naming conventions ([`is_encrypted_channel`],
//!   [`is_system_event`])

#![warn(missing_docs)]
#![warn(clippy::all)]

mod channel;
mod envelope;
mod error;
mod event;
mod payload;

pub use channel::{
    is_encrypted_channel, is_system_event, ENCRYPTED_CHANNEL_PREFIX, SYSTEM_EVENT_PREFIXES,
};
pub use envelope::EncryptedEnvelope;
pub use error::ParseError;
pub use event::CanonicalEvent;
pub use payload::{
    payload_from_str, string_field, RawPayload, CHANNEL_FIELD, DATA_FIELD, EVENT_FIELD,
    USER_ID_FIELD,
};
