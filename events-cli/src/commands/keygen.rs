//! Key generation command.

use anyhow::{Context, Result};
use pusher_events_core::{crypto, DecryptionKey};

/// Print a fresh base64 channel key.
pub fn run() -> Result<()> {
    let key = DecryptionKey::from_bytes(&crypto::generate_key().context("Failed to generate key")?);
    println!("{}", key.as_str());
    Ok(())
}
