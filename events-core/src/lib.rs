//! # events-core
//!
//! Event parsing, decryption and per-channel retry queue (no I/O, instant tests).
//!
//! ## Components
//!
//! - [`PayloadParser`] - Pure function from raw payload + optional key to a
//!   [`CanonicalEvent`](pusher_events_types::CanonicalEvent), opening
//!   secret-box envelopes on encrypted channels
//! - [`MemoryKeyStore`] - Current decryption key per channel, notifying a
//!   listener on every change
//! - [`ChannelEventQueue`] - Ordered per-channel buffer that pauses on a key
//!   failure, asks the [`EventSink`] for a new key, and resumes when the key
//!   store reports one
//!
//! ```text
//! transport ─report()─▶ ChannelEventQueue ─parse()─▶ PayloadParser
//!                            ▲      │
//!           on_key_updated() │      ├─ on_event() ─────────▶ EventSink
//!                            │      └─ on_decrypt_failure() ─▶ EventSink ─▶ auth flow
//!                       KeyStore ◀──────────── set()/clear() ───────────────┘
//! ```
//!
//! The transport and the key fetching flow live outside this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod key_store;
pub mod parser;
pub mod queue;

pub use crypto::{CryptoError, KEY_SIZE, NONCE_SIZE};
pub use key_store::{DecryptionKey, KeyStore, KeyStoreListener, ListenerId, MemoryKeyStore};
pub use parser::{EventParser, PayloadParser};
pub use queue::{ChannelEventQueue, EventSink};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// State behind these locks is never left half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
