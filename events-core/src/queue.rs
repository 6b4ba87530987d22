//! Per-channel event queue with pause/resume on decryption failure.
//!
//! Every payload reported for a channel is buffered in arrival order and
//! flushed through the [`EventParser`] with the channel's current key.
//!
//! ```text
//!             report()                        KeyStore::set/clear
//!                │                                     │
//!                ▼                                     ▼
//!   ┌─────────── Running ──── key error ───▶ Paused ───┐
//!   │               ▲    (refresh requested)    │      │ resuming flush
//!   │               └──── success / drop ◀──────┘◀─────┘
//!   └─ parse ok → on_event, format error → dropped
//! ```
//!
//! A paused channel keeps accepting payloads but only a key update re-runs
//! the flush. During that resuming flush a payload that still fails to
//! decrypt is dropped and the pause lifted, so each payload gets exactly one
//! retry per key refresh.
//!
//! # Locking
//!
//! Channel state lives behind one mutex, so refresh requests are issued at
//! most once per pause episode even when payloads and key updates arrive on
//! different threads. Sink callbacks never run under that mutex: flush
//! outcomes go to an outbox which one thread at a time drains in order. A
//! sink may therefore call back into the queue or the key store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use pusher_events_types::{CanonicalEvent, ParseError, RawPayload};

use crate::key_store::{KeyStore, KeyStoreListener, ListenerId};
use crate::lock;
use crate::parser::{EventParser, PayloadParser};

/// Receives the output of a [`ChannelEventQueue`].
pub trait EventSink: Send + Sync {
    /// A payload was parsed (and decrypted if needed).
    fn on_event(&self, event: CanonicalEvent, channel: Option<&str>);

    /// A payload on `channel` could not be decrypted with the current key.
    ///
    /// The channel is paused until the key store reports a new key.
    fn on_decrypt_failure(&self, channel: &str);
}

/// Buffered payloads of one channel.
#[derive(Debug, Default)]
struct ChannelQueue {
    pending: Vec<RawPayload>,
    paused: bool,
}

#[derive(Debug)]
enum Notification {
    Event {
        event: CanonicalEvent,
        channel: Option<String>,
    },
    DecryptFailure {
        channel: String,
    },
}

impl Notification {
    fn is_for(&self, name: &str) -> bool {
        match self {
            Notification::Event { channel, .. } => channel.as_deref() == Some(name),
            Notification::DecryptFailure { channel } => channel == name,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    channels: HashMap<String, ChannelQueue>,
    outbox: VecDeque<Notification>,
    draining: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    /// Triggered by a new payload; skipped while paused.
    Report,
    /// Triggered by a key update; runs even while paused.
    Resume,
}

/// Buffers payloads per channel and delivers them in order once decryptable.
///
/// Constructed behind an `Arc` because it registers itself (weakly) as the
/// key store's listener; dropping the queue unregisters it.
pub struct ChannelEventQueue<P: EventParser = PayloadParser> {
    parser: P,
    key_store: Arc<dyn KeyStore>,
    sink: Arc<dyn EventSink>,
    state: Mutex<QueueState>,
    listener_id: ListenerId,
}

impl ChannelEventQueue<PayloadParser> {
    /// Create a queue using the standard payload parser.
    pub fn new(key_store: Arc<dyn KeyStore>, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Self::with_parser(PayloadParser::new(), key_store, sink)
    }
}

impl<P: EventParser + 'static> ChannelEventQueue<P> {
    /// Create a queue with a custom parser.
    pub fn with_parser(
        parser: P,
        key_store: Arc<dyn KeyStore>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|queue: &Weak<Self>| {
            let listener: Weak<dyn KeyStoreListener> = queue.clone();
            let listener_id = key_store.register_listener(listener);
            Self {
                parser,
                key_store,
                sink,
                state: Mutex::new(QueueState::default()),
                listener_id,
            }
        })
    }
}

impl<P: EventParser> ChannelEventQueue<P> {
    /// Hand a payload to the queue.
    ///
    /// With a channel the payload is buffered and the channel flushed. Without
    /// one it is parsed immediately without a key; such payloads are never
    /// encrypted, so any parse failure just drops it.
    pub fn report(&self, payload: RawPayload, channel: Option<&str>) {
        match channel {
            Some(channel) => {
                {
                    let mut state = self.lock_state();
                    state
                        .channels
                        .entry(channel.to_string())
                        .or_default()
                        .pending
                        .push(payload);
                    self.flush_locked(&mut state, channel, FlushMode::Report);
                }
                self.drain();
            }
            None => {
                match self.parser.parse(&payload, None) {
                    Ok(event) => {
                        self.lock_state()
                            .outbox
                            .push_back(Notification::Event {
                                event,
                                channel: None,
                            });
                    }
                    Err(ParseError::InvalidDecryptionKey) => {}
                    Err(e) => {
                        tracing::debug!("Dropping payload without channel: {}", e);
                    }
                }
                self.drain();
            }
        }
    }

    /// Discard everything buffered for a channel.
    ///
    /// Events of the channel that were parsed but not yet handed to the sink
    /// are discarded too. Unknown channels are a no-op.
    pub fn remove_queue(&self, channel: &str) {
        let mut state = self.lock_state();
        if let Some(queue) = state.channels.remove(channel) {
            tracing::debug!(
                "Removed queue for {} ({} pending payloads)",
                channel,
                queue.pending.len()
            );
        }
        state.outbox.retain(|n| !n.is_for(channel));
    }

    /// Number of payloads buffered for a channel.
    pub fn pending_len(&self, channel: &str) -> usize {
        self.lock_state()
            .channels
            .get(channel)
            .map_or(0, |queue| queue.pending.len())
    }

    /// Whether a channel is waiting for a key update.
    pub fn is_paused(&self, channel: &str) -> bool {
        self.lock_state()
            .channels
            .get(channel)
            .is_some_and(|queue| queue.paused)
    }

    /// Number of channels with a buffer.
    pub fn channel_count(&self) -> usize {
        self.lock_state().channels.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }

    fn flush_locked(&self, state: &mut QueueState, channel: &str, mode: FlushMode) {
        let QueueState {
            channels, outbox, ..
        } = state;

        let Some(queue) = channels.get_mut(channel) else {
            return;
        };
        if queue.paused && mode == FlushMode::Report {
            return;
        }

        // Nothing is committed until the walk completes.
        let key = self.key_store.get(channel);
        let mut paused = queue.paused;
        let mut notifications = Vec::new();
        let mut consumed = 0;

        for payload in &queue.pending {
            match self.parser.parse(payload, key.as_ref()) {
                Ok(event) => {
                    paused = false;
                    notifications.push(Notification::Event {
                        event,
                        channel: Some(channel.to_string()),
                    });
                }
                Err(ParseError::InvalidDecryptionKey) if !paused => {
                    tracing::debug!("Pausing {} until a new decryption key arrives", channel);
                    paused = true;
                    notifications.push(Notification::DecryptFailure {
                        channel: channel.to_string(),
                    });
                    break;
                }
                Err(ParseError::InvalidDecryptionKey) => {
                    tracing::warn!(
                        "Skipping payload on {} that could not be decrypted after key refresh",
                        channel
                    );
                    paused = false;
                }
                Err(e) => {
                    tracing::debug!("Dropping payload on {}: {}", channel, e);
                }
            }
            consumed += 1;
        }

        // Everything before the stop point was delivered or dropped; the
        // failing payload and its successors stay in arrival order.
        queue.pending.drain(..consumed);
        queue.paused = paused;
        outbox.extend(notifications);
    }

    /// Deliver queued notifications unless another call is already doing so.
    fn drain(&self) {
        {
            let mut state = self.lock_state();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let mut guard = DrainGuard {
            state: &self.state,
            armed: true,
        };

        loop {
            let next = {
                let mut state = self.lock_state();
                match state.outbox.pop_front() {
                    Some(notification) => notification,
                    None => {
                        state.draining = false;
                        guard.armed = false;
                        break;
                    }
                }
            };

            match next {
                Notification::Event { event, channel } => {
                    self.sink.on_event(event, channel.as_deref());
                }
                Notification::DecryptFailure { channel } => {
                    self.sink.on_decrypt_failure(&channel);
                }
            }
        }
    }
}

impl<P: EventParser> KeyStoreListener for ChannelEventQueue<P> {
    fn on_key_updated(&self, channel: &str) {
        {
            let mut state = self.lock_state();
            self.flush_locked(&mut state, channel, FlushMode::Resume);
        }
        self.drain();
    }
}

impl<P: EventParser> Drop for ChannelEventQueue<P> {
    fn drop(&mut self) {
        self.key_store.unregister_listener(self.listener_id);
    }
}

impl<P: EventParser> std::fmt::Debug for ChannelEventQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEventQueue")
            .field("channels", &self.channel_count())
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

/// Releases the drain flag if a sink callback unwinds.
struct DrainGuard<'a> {
    state: &'a Mutex<QueueState>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.state).draining = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{seal_envelope, KEY_SIZE};
    use crate::key_store::{DecryptionKey, MemoryKeyStore};
    use serde_json::json;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};

    const CHANNEL: &str = "private-encrypted-room1";

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Event(Option<String>, Option<String>),
        Failure(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Seen>>,
    }

    impl RecordingSink {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }

        fn failures(&self) -> usize {
            self.seen()
                .iter()
                .filter(|s| matches!(s, Seen::Failure(_)))
                .count()
        }

        fn data(&self) -> Vec<String> {
            self.seen()
                .into_iter()
                .filter_map(|s| match s {
                    Seen::Event(_, data) => data,
                    Seen::Failure(_) => None,
                })
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn on_event(&self, event: CanonicalEvent, channel: Option<&str>) {
            self.seen.lock().unwrap().push(Seen::Event(
                channel.map(str::to_string),
                event.data().map(str::to_string),
            ));
        }

        fn on_decrypt_failure(&self, channel: &str) {
            self.seen
                .lock()
                .unwrap()
                .push(Seen::Failure(channel.to_string()));
        }
    }

    struct Fixture {
        store: Arc<MemoryKeyStore>,
        sink: Arc<RecordingSink>,
        queue: Arc<ChannelEventQueue>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryKeyStore::new());
        let sink = Arc::new(RecordingSink::default());
        let queue = ChannelEventQueue::new(store.clone(), sink.clone());
        Fixture { store, sink, queue }
    }

    fn raw(value: serde_json::Value) -> RawPayload {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    fn sealed(secret: &[u8], plaintext: &str) -> RawPayload {
        let envelope = seal_envelope(secret, plaintext.as_bytes()).unwrap();
        raw(json!({"event": "message", "channel": CHANNEL, "data": envelope.to_json()}))
    }

    fn key(secret: &[u8]) -> DecryptionKey {
        DecryptionKey::from_bytes(secret)
    }

    // ===========================================
    // Plain Delivery Tests
    // ===========================================

    #[test]
    fn plain_channel_delivers_immediately() {
        let f = fixture();
        f.queue.report(
            raw(json!({"event": "message", "channel": "room", "data": "hi"})),
            Some("room"),
        );

        assert_eq!(
            f.sink.seen(),
            vec![Seen::Event(Some("room".into()), Some("hi".into()))]
        );
        assert_eq!(f.queue.pending_len("room"), 0);
        assert_eq!(f.queue.channel_count(), 1);
    }

    #[test]
    fn payload_without_channel_delivers_without_channel() {
        let f = fixture();
        f.queue.report(
            raw(json!({"event": "pusher:connection_established", "data": "{}"})),
            None,
        );

        assert_eq!(f.sink.seen(), vec![Seen::Event(None, Some("{}".into()))]);
        assert_eq!(f.queue.channel_count(), 0);
    }

    #[test]
    fn malformed_payload_without_channel_is_dropped() {
        let f = fixture();
        f.queue.report(raw(json!({"data": "no event"})), None);

        assert!(f.sink.seen().is_empty());
    }

    #[test]
    fn format_error_drops_only_that_payload() {
        let f = fixture();
        f.queue.report(raw(json!({"channel": "room"})), Some("room"));
        f.queue.report(
            raw(json!({"event": "message", "channel": "room", "data": "ok"})),
            Some("room"),
        );

        assert_eq!(f.sink.data(), vec!["ok"]);
        assert_eq!(f.queue.pending_len("room"), 0);
        assert!(!f.queue.is_paused("room"));
    }

    // ===========================================
    // Pause / Resume Tests
    // ===========================================

    #[test]
    fn missing_key_pauses_and_requests_refresh_once() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "one"), Some(CHANNEL));
        f.queue.report(sealed(&secret, "two"), Some(CHANNEL));

        assert_eq!(f.sink.seen(), vec![Seen::Failure(CHANNEL.into())]);
        assert!(f.queue.is_paused(CHANNEL));
        assert_eq!(f.queue.pending_len(CHANNEL), 2);
    }

    #[test]
    fn key_update_resumes_in_arrival_order() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "P1"), Some(CHANNEL));
        f.queue.report(sealed(&secret, "P2"), Some(CHANNEL));
        f.queue.report(sealed(&secret, "P3"), Some(CHANNEL));
        f.store.set(CHANNEL, key(&secret));

        assert_eq!(f.sink.data(), vec!["P1", "P2", "P3"]);
        assert_eq!(f.sink.failures(), 1);
        assert!(!f.queue.is_paused(CHANNEL));
        assert_eq!(f.queue.pending_len(CHANNEL), 0);
    }

    #[test]
    fn wrong_key_after_refresh_drops_payload_once() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];
        let stale = [0x24; KEY_SIZE];

        f.queue.report(sealed(&stale, "undecryptable"), Some(CHANNEL));
        f.queue.report(sealed(&secret, "fine"), Some(CHANNEL));
        f.store.set(CHANNEL, key(&secret));

        assert_eq!(
            f.sink.seen(),
            vec![
                Seen::Failure(CHANNEL.into()),
                Seen::Event(Some(CHANNEL.into()), Some("fine".into())),
            ]
        );
        assert_eq!(f.queue.pending_len(CHANNEL), 0);
    }

    #[test]
    fn second_failure_in_resume_pass_pauses_again() {
        let f = fixture();
        let wrong = [0x01; KEY_SIZE];

        f.queue.report(sealed(&[0x02; KEY_SIZE], "a"), Some(CHANNEL));
        f.queue.report(sealed(&[0x03; KEY_SIZE], "b"), Some(CHANNEL));
        f.queue.report(sealed(&[0x04; KEY_SIZE], "c"), Some(CHANNEL));
        f.store.set(CHANNEL, key(&wrong));

        // "a" dropped, "b" pauses with a second refresh request, "c" waits
        assert_eq!(f.sink.failures(), 2);
        assert!(f.queue.is_paused(CHANNEL));
        assert_eq!(f.queue.pending_len(CHANNEL), 2);
    }

    #[test]
    fn paused_channel_ignores_new_reports_until_key_update() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "first"), Some(CHANNEL));
        f.queue.report(
            raw(json!({"event": "pusher:subscription_succeeded", "channel": CHANNEL, "data": "{}"})),
            Some(CHANNEL),
        );

        // System event waits behind the paused payload
        assert_eq!(f.sink.data(), Vec::<String>::new());
        assert_eq!(f.queue.pending_len(CHANNEL), 2);

        f.store.set(CHANNEL, key(&secret));
        assert_eq!(f.sink.data(), vec!["first", "{}"]);
    }

    #[test]
    fn clearing_key_also_resumes() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "a"), Some(CHANNEL));
        f.queue.report(sealed(&secret, "b"), Some(CHANNEL));
        f.store.clear(CHANNEL);

        // Still no key: "a" dropped, "b" re-pauses
        assert_eq!(f.sink.failures(), 2);
        assert_eq!(f.queue.pending_len(CHANNEL), 1);
    }

    #[test]
    fn key_update_for_unknown_channel_is_noop() {
        let f = fixture();
        f.store.set("private-encrypted-other", key(&[0x42; KEY_SIZE]));

        assert!(f.sink.seen().is_empty());
        assert_eq!(f.queue.channel_count(), 0);
    }

    #[test]
    fn channels_are_independent() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "blocked"), Some(CHANNEL));
        f.queue.report(
            raw(json!({"event": "message", "channel": "room", "data": "free"})),
            Some("room"),
        );

        assert_eq!(
            f.sink.seen(),
            vec![
                Seen::Failure(CHANNEL.into()),
                Seen::Event(Some("room".into()), Some("free".into())),
            ]
        );
    }

    // ===========================================
    // Removal Tests
    // ===========================================

    #[test]
    fn remove_queue_discards_pending_payloads() {
        let f = fixture();
        let secret = [0x42; KEY_SIZE];

        f.queue.report(sealed(&secret, "gone"), Some(CHANNEL));
        f.queue.remove_queue(CHANNEL);
        f.store.set(CHANNEL, key(&secret));

        assert_eq!(f.sink.seen(), vec![Seen::Failure(CHANNEL.into())]);
        assert_eq!(f.queue.pending_len(CHANNEL), 0);
        assert_eq!(f.queue.channel_count(), 0);
    }

    #[test]
    fn remove_unknown_queue_is_noop() {
        let f = fixture();
        // Should not panic
        f.queue.remove_queue("never-seen");
        assert_eq!(f.queue.channel_count(), 0);
    }

    #[test]
    fn channel_is_recreated_after_removal() {
        let f = fixture();
        f.queue.remove_queue("room");
        f.queue.report(
            raw(json!({"event": "message", "channel": "room", "data": "again"})),
            Some("room"),
        );

        assert_eq!(f.sink.data(), vec!["again"]);
    }

    // ===========================================
    // Re-entrancy Tests
    // ===========================================

    /// Sink that answers refresh requests synchronously from a key table.
    struct RefreshingSink {
        store: Arc<MemoryKeyStore>,
        key: DecryptionKey,
        inner: RecordingSink,
    }

    impl EventSink for RefreshingSink {
        fn on_event(&self, event: CanonicalEvent, channel: Option<&str>) {
            self.inner.on_event(event, channel);
        }

        fn on_decrypt_failure(&self, channel: &str) {
            self.inner.on_decrypt_failure(channel);
            self.store.set(channel, self.key.clone());
        }
    }

    #[test]
    fn sink_may_set_key_synchronously() {
        let secret = [0x42; KEY_SIZE];
        let store = Arc::new(MemoryKeyStore::new());
        let sink = Arc::new(RefreshingSink {
            store: store.clone(),
            key: key(&secret),
            inner: RecordingSink::default(),
        });
        let queue = ChannelEventQueue::new(store.clone(), sink.clone());

        queue.report(sealed(&secret, "x"), Some(CHANNEL));
        queue.report(sealed(&secret, "y"), Some(CHANNEL));

        assert_eq!(
            sink.inner.seen(),
            vec![
                Seen::Failure(CHANNEL.into()),
                Seen::Event(Some(CHANNEL.into()), Some("x".into())),
                Seen::Event(Some(CHANNEL.into()), Some("y".into())),
            ]
        );
    }

    /// Sink that removes the channel's queue after the first event.
    struct RemovingSink {
        queue: Mutex<Weak<ChannelEventQueue>>,
        inner: RecordingSink,
    }

    impl EventSink for RemovingSink {
        fn on_event(&self, event: CanonicalEvent, channel: Option<&str>) {
            self.inner.on_event(event, channel);
            if let (Some(queue), Some(channel)) = (self.queue.lock().unwrap().upgrade(), channel) {
                queue.remove_queue(channel);
            }
        }

        fn on_decrypt_failure(&self, channel: &str) {
            self.inner.on_decrypt_failure(channel);
        }
    }

    #[test]
    fn removal_from_sink_stops_remaining_deliveries() {
        let secret = [0x42; KEY_SIZE];
        let store = Arc::new(MemoryKeyStore::new());
        let sink = Arc::new(RemovingSink {
            queue: Mutex::new(Weak::new()),
            inner: RecordingSink::default(),
        });
        let queue = ChannelEventQueue::new(store.clone(), sink.clone());
        *sink.queue.lock().unwrap() = Arc::downgrade(&queue);

        queue.report(sealed(&secret, "1"), Some(CHANNEL));
        queue.report(sealed(&secret, "2"), Some(CHANNEL));
        store.set(CHANNEL, key(&secret));

        assert_eq!(sink.inner.data(), vec!["1"]);
    }

    // ===========================================
    // Lifecycle Tests
    // ===========================================

    #[test]
    fn dropping_queue_unregisters_listener() {
        let f = fixture();
        let Fixture { store, sink, queue } = f;
        drop(queue);

        // Should not panic, and nothing is delivered
        store.set(CHANNEL, key(&[0x42; KEY_SIZE]));
        assert!(sink.seen().is_empty());
    }

    /// Delegates to the standard parser unless armed, then panics.
    struct PanickingParser {
        armed: Arc<AtomicBool>,
    }

    impl EventParser for PanickingParser {
        fn parse(
            &self,
            payload: &RawPayload,
            key: Option<&DecryptionKey>,
        ) -> Result<CanonicalEvent, ParseError> {
            if self.armed.load(Ordering::SeqCst) {
                panic!("parser failure");
            }
            PayloadParser::new().parse(payload, key)
        }
    }

    #[test]
    fn panicking_parser_leaves_buffer_intact() {
        let store = Arc::new(MemoryKeyStore::new());
        let sink = Arc::new(RecordingSink::default());
        let armed = Arc::new(AtomicBool::new(false));
        let queue = ChannelEventQueue::with_parser(
            PanickingParser {
                armed: Arc::clone(&armed),
            },
            store.clone(),
            sink.clone(),
        );
        let secret = [0x42; KEY_SIZE];

        for text in ["a", "b", "c"] {
            queue.report(sealed(&secret, text), Some(CHANNEL));
        }
        assert_eq!(queue.pending_len(CHANNEL), 3);

        armed.store(true, Ordering::SeqCst);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            store.set(CHANNEL, key(&secret));
        }));
        assert!(result.is_err());

        // Buffer and pause survive the unwind
        assert_eq!(queue.pending_len(CHANNEL), 3);
        assert!(queue.is_paused(CHANNEL));
        assert_eq!(sink.failures(), 1);

        armed.store(false, Ordering::SeqCst);
        store.set(CHANNEL, key(&secret));

        assert_eq!(sink.data(), vec!["a", "b", "c"]);
        assert_eq!(queue.pending_len(CHANNEL), 0);
        assert!(!queue.is_paused(CHANNEL));
    }

    #[test]
    fn queue_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChannelEventQueue>();
    }
}
