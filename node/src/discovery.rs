//! Bookkeeping for discovered-but-not-yet-connected peers.
//!
//! The cache remembers when each candidate was last surfaced so the
//! periodic discovery pass can drop entries that went stale without ever
//! being connected.

use std::collections::HashMap;

use lattice_types::{NetworkAddress, NodeId, Timestamp};

#[derive(Debug, Default)]
pub struct DiscoveryCache {
    discovered: HashMap<NodeId, (NetworkAddress, Timestamp)>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) a discovered candidate.
    pub fn record(&mut self, id: NodeId, address: NetworkAddress, now: Timestamp) {
        self.discovered.insert(id, (address, now));
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.discovered.contains_key(&id)
    }

    pub fn address_of(&self, id: NodeId) -> Option<&NetworkAddress> {
        self.discovered.get(&id).map(|(address, _)| address)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.discovered.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty()
    }

    /// Drop entries older than `max_age_secs`. Returns how many were
    /// removed.
    pub fn remove_stale(&mut self, max_age_secs: u64, now: Timestamp) -> usize {
        let before = self.discovered.len();
        self.discovered
            .retain(|_, (_, recorded)| !recorded.has_expired(max_age_secs, now));
        before - self.discovered.len()
    }
}
