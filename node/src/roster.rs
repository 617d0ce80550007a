//! The local node: identity, self-liveness, and the bounded peer roster.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lattice_types::{NetworkAddress, NodeId, OverlayError, Timestamp};

/// One peer the local node keeps a transport session with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: NodeId,
    pub address: NetworkAddress,
}

/// Insertion-ordered, bounded list of peers. Ids are unique; the list never
/// exceeds its cap.
#[derive(Debug)]
pub struct PeerRoster {
    entries: Vec<PeerEntry>,
    max_peers: usize,
}

impl PeerRoster {
    pub fn new(max_peers: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_peers),
            max_peers,
        }
    }

    /// Add a peer. Rejects duplicates and additions past the cap.
    pub fn add(&mut self, id: NodeId, address: NetworkAddress) -> Result<(), OverlayError> {
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(OverlayError::AlreadyPresent(id));
        }
        if self.entries.len() >= self.max_peers {
            return Err(OverlayError::CapacityExhausted);
        }
        self.entries.push(PeerEntry { id, address });
        Ok(())
    }

    /// Remove a peer, returning its address.
    pub fn remove(&mut self, id: NodeId) -> Result<NetworkAddress, OverlayError> {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => Ok(self.entries.remove(index).address),
            None => Err(OverlayError::NotFound(format!("peer {id}"))),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn addresses(&self) -> Vec<NetworkAddress> {
        self.entries.iter().map(|entry| entry.address.clone()).collect()
    }

    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_peers
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }
}

/// This process's node: id, bound address, active flag, self-observed
/// liveness, the peer roster, and a shadow of the believed topology
/// neighbors. Roster operations are atomic under one mutex.
pub struct LocalNode {
    id: NodeId,
    address: NetworkAddress,
    active: AtomicBool,
    last_seen: Mutex<Timestamp>,
    roster: Mutex<PeerRoster>,
    neighbors: Mutex<Vec<NodeId>>,
}

impl LocalNode {
    pub fn new(id: NodeId, address: NetworkAddress, max_peers: usize) -> Self {
        Self {
            id,
            address,
            active: AtomicBool::new(false),
            last_seen: Mutex::new(Timestamp::now()),
            roster: Mutex::new(PeerRoster::new(max_peers)),
            neighbors: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    // ── Self-liveness ───────────────────────────────────────────────────

    pub fn update_last_seen(&self, now: Timestamp) {
        *self.last_seen.lock().expect("lock poisoned") = now;
    }

    pub fn last_seen(&self) -> Timestamp {
        *self.last_seen.lock().expect("lock poisoned")
    }

    /// True while less than `timeout_secs` have passed since the last
    /// observed activity.
    pub fn is_alive(&self, timeout_secs: u64, now: Timestamp) -> bool {
        !self.last_seen().has_expired(timeout_secs, now)
    }

    // ── Peer roster ─────────────────────────────────────────────────────

    pub fn add_peer(&self, id: NodeId, address: NetworkAddress) -> Result<(), OverlayError> {
        self.roster.lock().expect("lock poisoned").add(id, address)
    }

    pub fn remove_peer(&self, id: NodeId) -> Result<NetworkAddress, OverlayError> {
        self.roster.lock().expect("lock poisoned").remove(id)
    }

    pub fn has_peer(&self, id: NodeId) -> bool {
        self.roster.lock().expect("lock poisoned").contains(id)
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.roster.lock().expect("lock poisoned").ids()
    }

    pub fn peer_addresses(&self) -> Vec<NetworkAddress> {
        self.roster.lock().expect("lock poisoned").addresses()
    }

    pub fn peer_count(&self) -> usize {
        self.roster.lock().expect("lock poisoned").len()
    }

    pub fn roster_is_full(&self) -> bool {
        self.roster.lock().expect("lock poisoned").is_full()
    }

    pub fn max_peers(&self) -> usize {
        self.roster.lock().expect("lock poisoned").max_peers()
    }

    // ── Topology shadow ─────────────────────────────────────────────────

    pub fn set_neighbors(&self, neighbors: Vec<NodeId>) {
        *self.neighbors.lock().expect("lock poisoned") = neighbors;
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.neighbors.lock().expect("lock poisoned").clone()
    }
}
