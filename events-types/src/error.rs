//! Error types for event parsing.

use thiserror::Error;

/// Errors that can occur while turning a raw payload into an event.
///
/// The two variants carry different recovery actions: a format error is
/// permanent for the payload that caused it, a decryption key error means a
/// fresh key should be requested and the payload retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Payload or envelope shape is malformed.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Decryption key is missing, malformed, or does not open the payload.
    /// No details provided to avoid leaking why decryption failed.
    #[error("invalid decryption key")]
    InvalidDecryptionKey,
}

impl ParseError {
    /// Build a format error from any displayable reason.
    pub fn invalid_format(reason: impl std::fmt::Display) -> Self {
        Self::InvalidFormat(reason.to_string())
    }

    /// Whether a new decryption key could make the same payload parse.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidDecryptionKey)
    }
}
