//! Reserved channel and event naming conventions.

/// Channels whose name starts with this prefix carry encrypted `data`.
pub const ENCRYPTED_CHANNEL_PREFIX: &str = "private-encrypted-";

/// Event names starting with one of these prefixes are protocol events.
pub const SYSTEM_EVENT_PREFIXES: [&str; 2] = ["pusher:", "pusher_internal:"];

/// Check whether a channel transmits end-to-end encrypted payloads.
pub fn is_encrypted_channel(channel: &str) -> bool {
    channel.starts_with(ENCRYPTED_CHANNEL_PREFIX)
}

/// Check whether an event belongs to the internal protocol namespace.
///
/// System events are never encrypted, even on encrypted channels.
pub fn is_system_event(event: &str) -> bool {
    SYSTEM_EVENT_PREFIXES
        .iter()
        .any(|prefix| event.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_channel_detection() {
        assert!(is_encrypted_channel("private-encrypted-room1"));
        assert!(is_encrypted_channel("private-encrypted-"));

        assert!(!is_encrypted_channel("private-room1"));
        assert!(!is_encrypted_channel("presence-encrypted-room1"));
        assert!(!is_encrypted_channel("room1-private-encrypted-"));
        assert!(!is_encrypted_channel(""));
    }

    #[test]
    fn encrypted_prefix_is_case_sensitive() {
        assert!(!is_encrypted_channel("Private-Encrypted-room1"));
    }

    #[test]
    fn system_event_detection() {
        assert!(is_system_event("pusher:subscription_succeeded"));
        assert!(is_system_event("pusher_internal:member_added"));
        assert!(is_system_event("pusher:"));

        assert!(!is_system_event("message"));
        assert!(!is_system_event("client-pusher:typing"));
        assert!(!is_system_event("pusher-internal:member_added"));
    }
}
