//! Replay command: drive recorded transport payloads through the queue.
//!
//! Each input line is one raw payload. Lines are reported to a
//! [`ChannelEventQueue`] on the channel named in the payload. Delivered events
//! are written to the output as JSON lines. Key refresh requests are answered
//! from the `[keys]` table of the config, standing in for an auth endpoint.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use pusher_events_core::{ChannelEventQueue, DecryptionKey, EventSink, KeyStore, MemoryKeyStore};
use pusher_events_types::{payload_from_str, string_field, CanonicalEvent, CHANNEL_FIELD};

use crate::config::ReplayConfig;

/// Counters gathered over one replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Payloads handed to the queue.
    pub reported: usize,
    /// Events written to the output.
    pub delivered: usize,
    /// Key refreshes requested by the queue.
    pub refreshes: usize,
    /// Input lines that were not JSON objects.
    pub skipped: usize,
    /// Payloads still waiting for a key, by channel.
    pub undelivered: BTreeMap<String, usize>,
}

impl ReplaySummary {
    /// Print the summary to stderr.
    pub fn report(&self) {
        eprintln!(
            "Replayed {} payloads: {} delivered, {} key refreshes, {} lines skipped",
            self.reported, self.delivered, self.refreshes, self.skipped
        );
        for (channel, count) in &self.undelivered {
            eprintln!("  {}: {} undelivered (no usable key)", channel, count);
        }
    }
}

/// Sink that prints events and answers refresh requests from configured keys.
struct ReplaySink<W> {
    out: Mutex<W>,
    keys: HashMap<String, DecryptionKey>,
    key_store: Arc<MemoryKeyStore>,
    delivered: AtomicUsize,
    refreshes: AtomicUsize,
}

impl<W: Write + Send> EventSink for ReplaySink<W> {
    fn on_event(&self, event: CanonicalEvent, channel: Option<&str>) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize event {}: {}", event.event_name(), e);
                return;
            }
        };

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        match writeln!(out, "{}", line) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Delivered {} on {:?}", event.event_name(), channel);
            }
            Err(e) => tracing::error!("Failed to write event: {}", e),
        }
    }

    fn on_decrypt_failure(&self, channel: &str) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        match self.keys.get(channel) {
            Some(key) => {
                tracing::info!("Refreshing key for {}", channel);
                self.key_store.set(channel, key.clone());
            }
            None => tracing::warn!("No key configured for {}", channel),
        }
    }
}

/// Replay every line of `input`, writing delivered events to `out`.
///
/// # Errors
///
/// Returns an error only if reading the input fails. Malformed lines are
/// skipped with a warning.
pub fn run<R, W>(config: &ReplayConfig, input: R, out: W) -> Result<ReplaySummary>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let key_store = Arc::new(MemoryKeyStore::new());
    let sink = Arc::new(ReplaySink {
        out: Mutex::new(out),
        keys: config
            .keys
            .iter()
            .map(|(channel, key)| (channel.clone(), DecryptionKey::from(key.as_str())))
            .collect(),
        key_store: Arc::clone(&key_store),
        delivered: AtomicUsize::new(0),
        refreshes: AtomicUsize::new(0),
    });
    let queue = ChannelEventQueue::new(key_store, sink.clone());

    let mut summary = ReplaySummary::default();
    let mut channels = BTreeSet::new();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let payload = match payload_from_str(line) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", index + 1, e);
                summary.skipped += 1;
                continue;
            }
        };

        let channel = string_field(&payload, CHANNEL_FIELD).map(str::to_string);
        if let Some(channel) = &channel {
            channels.insert(channel.clone());
        }
        queue.report(payload, channel.as_deref());
        summary.reported += 1;
    }

    sink.out
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .flush()
        .context("Failed to flush output")?;

    summary.delivered = sink.delivered.load(Ordering::Relaxed);
    summary.refreshes = sink.refreshes.load(Ordering::Relaxed);
    summary.undelivered = channels
        .into_iter()
        .map(|channel| (queue.pending_len(&channel), channel))
        .filter(|(pending, _)| *pending > 0)
        .map(|(pending, channel)| (channel, pending))
        .collect();

    Ok(summary)
}
