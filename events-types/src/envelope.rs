//! EncryptedEnvelope - the structure an encrypted event's `data` decodes to.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Nonce and ciphertext of an encrypted event, both base64 encoded.
///
/// Wire format (JSON text inside the event's `data` field):
///
/// ```text
/// { "nonce": "<base64>", "ciphertext": "<base64>" }
/// ```
///
/// Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64-encoded nonce.
    pub nonce: String,
    /// Base64-encoded authenticated ciphertext.
    pub ciphertext: String,
}

impl EncryptedEnvelope {
    /// Build an envelope from raw nonce and ciphertext bytes.
    pub fn from_parts(nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        }
    }

    /// Decode an envelope from the JSON text of a `data` field.
    pub fn from_json(data: &str) -> Result<Self, ParseError> {
        serde_json::from_str(data)
            .map_err(|e| ParseError::InvalidFormat(format!("malformed envelope: {}", e)))
    }

    /// Encode as the JSON text carried in a `data` field.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "nonce": self.nonce,
            "ciphertext": self.ciphertext,
        })
        .to_string()
    }

    /// Decode the nonce bytes.
    pub fn decode_nonce(&self) -> Result<Vec<u8>, ParseError> {
        STANDARD
            .decode(&self.nonce)
            .map_err(|e| ParseError::InvalidFormat(format!("nonce is not base64: {}", e)))
    }

    /// Decode the ciphertext bytes.
    pub fn decode_ciphertext(&self) -> Result<Vec<u8>, ParseError> {
        STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| ParseError::InvalidFormat(format!("ciphertext is not base64: {}", e)))
    }
}
