//! Per-channel decryption key storage.
//!
//! The key store holds the current key for each encrypted channel and tells a
//! single registered listener whenever a key is set or cleared. The listener
//! is held weakly, so the store never keeps the channel queue alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};

use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::Zeroizing;

use crate::lock;

/// A channel decryption key: base64 of the raw secret-box key.
///
/// The encoded string is zeroed on drop.
#[derive(Clone)]
pub struct DecryptionKey(Zeroizing<String>);

impl DecryptionKey {
    /// Wrap an already base64-encoded key.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(Zeroizing::new(encoded.into()))
    }

    /// Encode raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(STANDARD.encode(bytes))
    }

    /// The base64 form as supplied.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Decode the raw key bytes.
    pub fn decode(&self) -> Result<Zeroizing<Vec<u8>>, base64::DecodeError> {
        STANDARD.decode(self.as_str()).map(Zeroizing::new)
    }
}

impl From<String> for DecryptionKey {
    fn from(encoded: String) -> Self {
        Self::new(encoded)
    }
}

impl From<&str> for DecryptionKey {
    fn from(encoded: &str) -> Self {
        Self::new(encoded)
    }
}

impl PartialEq for DecryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for DecryptionKey {}

// Don't leak keys in debug output
impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecryptionKey([REDACTED])")
    }
}

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receives a notification after every key mutation.
pub trait KeyStoreListener: Send + Sync {
    /// The key for `channel` was set or cleared.
    fn on_key_updated(&self, channel: &str);
}

/// Storage for per-channel decryption keys.
///
/// Implementations must make a mutation visible to [`KeyStore::get`] before
/// notifying the listener, and must not hold any internal lock while the
/// listener runs: the listener typically calls `get` straight back.
pub trait KeyStore: Send + Sync {
    /// Current key for a channel, if known.
    fn get(&self, channel: &str) -> Option<DecryptionKey>;

    /// Store a key and notify the listener.
    fn set(&self, channel: &str, key: DecryptionKey);

    /// Forget a key and notify the listener.
    fn clear(&self, channel: &str);

    /// Register the listener, replacing any previous one.
    fn register_listener(&self, listener: Weak<dyn KeyStoreListener>) -> ListenerId;

    /// Remove the listener if `id` still identifies it.
    fn unregister_listener(&self, id: ListenerId);
}

struct Registration {
    id: ListenerId,
    listener: Weak<dyn KeyStoreListener>,
}

/// In-memory key store.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, DecryptionKey>>,
    listener: Mutex<Option<Registration>>,
    next_listener_id: AtomicU64,
}

impl MemoryKeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels with a known key.
    pub fn len(&self) -> usize {
        lock(&self.keys).len()
    }

    /// Check if no keys are stored.
    pub fn is_empty(&self) -> bool {
        lock(&self.keys).is_empty()
    }

    fn notify(&self, channel: &str) {
        let listener = lock(&self.listener)
            .as_ref()
            .and_then(|registration| registration.listener.upgrade());

        match listener {
            Some(listener) => listener.on_key_updated(channel),
            None => tracing::trace!("No listener for key update on {}", channel),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, channel: &str) -> Option<DecryptionKey> {
        lock(&self.keys).get(channel).cloned()
    }

    fn set(&self, channel: &str, key: DecryptionKey) {
        lock(&self.keys).insert(channel.to_string(), key);
        tracing::trace!("Decryption key set for {}", channel);
        self.notify(channel);
    }

    fn clear(&self, channel: &str) {
        lock(&self.keys).remove(channel);
        tracing::trace!("Decryption key cleared for {}", channel);
        self.notify(channel);
    }

    fn register_listener(&self, listener: Weak<dyn KeyStoreListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        *lock(&self.listener) = Some(Registration { id, listener });
        id
    }

    fn unregister_listener(&self, id: ListenerId) {
        let mut registration = lock(&self.listener);
        if registration.as_ref().is_some_and(|r| r.id == id) {
            *registration = None;
        }
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("keys", &format!("[{} keys REDACTED]", self.len()))
            .finish()
    }
}
