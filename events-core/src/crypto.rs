//! Secret-box primitives for encrypted channels.
//!
//! This module provides:
//! - XSalsa20-Poly1305 authenticated decryption (`open`)
//! - The paired encryption (`seal`, `seal_with_nonce`) used to build fixtures
//! - Random key generation
//!
//! # Wire Layout
//!
//! Ciphertexts use the libsodium `crypto_secretbox_easy` layout: the 16-byte
//! Poly1305 tag followed by the encrypted bytes.

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Nonce, XSalsa20Poly1305,
};
use pusher_events_types::EncryptedEnvelope;
use thiserror::Error;

/// Key size for XSalsa20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for XSalsa20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid nonce length.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,
}

fn cipher_for(key: &[u8]) -> Result<XSalsa20Poly1305, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

fn check_nonce(nonce: &[u8]) -> Result<&Nonce, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(Nonce::from_slice(nonce))
}

/// Open an authenticated ciphertext.
///
/// Returns `DecryptionFailed` if the tag does not verify (wrong key, wrong
/// nonce, or tampered ciphertext).
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = check_nonce(nonce)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal plaintext with an explicit nonce.
///
/// Nonces must never repeat under the same key.
pub fn seal_with_nonce(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = check_nonce(nonce)?;
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))
}

/// Seal plaintext under a random 192-bit nonce.
///
/// Returns (nonce, ciphertext).
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>), CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = seal_with_nonce(key, &nonce, plaintext)?;
    Ok((nonce, ciphertext))
}

/// Seal plaintext into the envelope carried by an encrypted event's `data`.
pub fn seal_envelope(key: &[u8], plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
    let (nonce, ciphertext) = seal(key, plaintext)?;
    Ok(EncryptedEnvelope::from_parts(&nonce, &ciphertext))
}

/// Generate a random secret-box key.
pub fn generate_key() -> Result<[u8; KEY_SIZE], CryptoError> {
    let mut key = [0u8; KEY_SIZE];
    getrandom::getrandom(&mut key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(key)
}
