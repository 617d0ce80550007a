//! Flood-message deduplication.
//!
//! Keeps a short-lived set of recently forwarded message fingerprints so a
//! flooded message is relayed at most once per node. Entries are evicted by
//! age during the periodic cleanup sweep.

use std::collections::HashMap;

use blake2::{Blake2b512, Digest};
use lattice_types::{NodeId, Timestamp};

/// The seen-set: fingerprint → time of first observation.
#[derive(Debug, Default)]
pub struct SeenMessages {
    seen: HashMap<u64, Timestamp>,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of a message for duplicate suppression: the first eight
    /// bytes of Blake2b-512 over (sender, receiver, timestamp). Messages
    /// sharing all three fields still collide; that is the protocol's
    /// identity notion for flooding.
    pub fn fingerprint(sender: NodeId, receiver: NodeId, timestamp: Timestamp) -> u64 {
        let mut hasher = Blake2b512::new();
        hasher.update(sender.as_u64().to_le_bytes());
        hasher.update(receiver.as_u64().to_le_bytes());
        hasher.update(timestamp.as_millis().to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Record a fingerprint. Returns `true` when it was fresh (the caller
    /// should forward), `false` when it was already seen (drop silently).
    pub fn observe(&mut self, fingerprint: u64, now: Timestamp) -> bool {
        if self.seen.contains_key(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint, now);
        true
    }

    pub fn contains(&self, fingerprint: u64) -> bool {
        self.seen.contains_key(&fingerprint)
    }

    /// Evict fingerprints first observed more than `max_age_secs` ago.
    /// Returns how many were dropped.
    pub fn cleanup(&mut self, max_age_secs: u64, now: Timestamp) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, first_seen| !first_seen.has_expired(max_age_secs, now));
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn first_observation_is_fresh_second_is_not() {
        let mut seen = SeenMessages::new();
        let fp = SeenMessages::fingerprint(NodeId::new(1), NodeId::new(2), t(1000));
        assert!(seen.observe(fp, t(1000)));
        assert!(!seen.observe(fp, t(1001)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn fingerprints_differ_across_fields() {
        let base = SeenMessages::fingerprint(NodeId::new(1), NodeId::new(2), t(1000));
        assert_ne!(
            base,
            SeenMessages::fingerprint(NodeId::new(3), NodeId::new(2), t(1000))
        );
        assert_ne!(
            base,
            SeenMessages::fingerprint(NodeId::new(1), NodeId::new(4), t(1000))
        );
        assert_ne!(
            base,
            SeenMessages::fingerprint(NodeId::new(1), NodeId::new(2), t(1001))
        );
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = SeenMessages::fingerprint(NodeId::new(7), NodeId::new(8), t(555));
        let b = SeenMessages::fingerprint(NodeId::new(7), NodeId::new(8), t(555));
        assert_eq!(a, b);
    }

    #[test]
    fn swapped_sender_receiver_do_not_collide() {
        // The old XOR scheme collapsed these; the keyed hash must not.
        let a = SeenMessages::fingerprint(NodeId::new(1), NodeId::new(2), t(9));
        let b = SeenMessages::fingerprint(NodeId::new(2), NodeId::new(1), t(9));
        assert_ne!(a, b);
    }

    #[test]
    fn cleanup_evicts_only_expired_entries() {
        let mut seen = SeenMessages::new();
        seen.observe(1, t(0));
        seen.observe(2, t(200_000));

        // At t=300s the first entry is exactly at the deadline.
        let dropped = seen.cleanup(300, t(300_000));
        assert_eq!(dropped, 1);
        assert!(!seen.contains(1));
        assert!(seen.contains(2));

        // A fingerprint evicted by age may be observed fresh again.
        assert!(seen.observe(1, t(300_001)));
    }
}
