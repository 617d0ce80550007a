//! Per-peer lifecycle records and failure detection.
//!
//! State machine for each known peer:
//!
//! ```text
//!             insert               accept/peer added
//!   Unknown ─────────► Joining ──────────────► Active
//!                                                 │
//!                     3 missed sweeps             │ graceful leave
//!                     or forced removal           ▼
//!                           ▼                 Leaving
//!                         Failed                  │
//!                                                 ▼
//!                                             (removed)
//! ```
//!
//! Active never returns to Joining, and Failed is terminal until the
//! record is deleted. The sweep only inspects records; the caller removes
//! the returned candidates after releasing this table's lock, so the
//! topology lock is never taken underneath it.

use std::collections::HashMap;

use lattice_types::{NetworkAddress, NodeId, OverlayError, Timestamp};

/// Lifecycle state of a known peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Joining,
    Active,
    Leaving,
    Failed,
    /// Not in the table at all.
    Unknown,
}

/// Everything tracked per known peer.
#[derive(Clone, Debug)]
pub struct MemberRecord {
    pub id: NodeId,
    pub address: NetworkAddress,
    pub state: NodeState,
    pub join_time: Timestamp,
    pub last_seen: Timestamp,
    pub failure_count: u32,
}

/// The membership table. Pure state machine: no I/O, explicit clock.
#[derive(Debug)]
pub struct MembershipTable {
    records: HashMap<NodeId, MemberRecord>,
    failure_threshold: u32,
}

impl MembershipTable {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            records: HashMap::new(),
            failure_threshold,
        }
    }

    /// Start tracking a peer in the Joining state.
    pub fn insert_joining(
        &mut self,
        id: NodeId,
        address: NetworkAddress,
        now: Timestamp,
    ) -> Result<(), OverlayError> {
        if self.records.contains_key(&id) {
            return Err(OverlayError::AlreadyPresent(id));
        }
        self.records.insert(
            id,
            MemberRecord {
                id,
                address,
                state: NodeState::Joining,
                join_time: now,
                last_seen: now,
                failure_count: 0,
            },
        );
        Ok(())
    }

    /// Joining → Active. No-op when already Active; refused from Leaving
    /// and Failed.
    pub fn mark_active(&mut self, id: NodeId) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if matches!(record.state, NodeState::Joining | NodeState::Active) => {
                record.state = NodeState::Active;
                true
            }
            _ => false,
        }
    }

    /// Begin a graceful departure.
    pub fn mark_leaving(&mut self, id: NodeId) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.state != NodeState::Failed => {
                record.state = NodeState::Leaving;
                true
            }
            _ => false,
        }
    }

    /// Terminal failure. Allowed from any live state.
    pub fn mark_failed(&mut self, id: NodeId) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.state = NodeState::Failed;
                true
            }
            None => false,
        }
    }

    /// Record observed activity: refresh `last_seen` and clear strikes.
    pub fn touch(&mut self, id: NodeId, now: Timestamp) {
        if let Some(record) = self.records.get_mut(&id) {
            record.last_seen = now;
            record.failure_count = 0;
        }
    }

    /// Delete a record entirely.
    pub fn remove(&mut self, id: NodeId) -> Option<MemberRecord> {
        self.records.remove(&id)
    }

    pub fn state_of(&self, id: NodeId) -> NodeState {
        self.records
            .get(&id)
            .map(|record| record.state)
            .unwrap_or(NodeState::Unknown)
    }

    pub fn record(&self, id: NodeId) -> Option<&MemberRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn ids_in_state(&self, state: NodeState) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .records
            .values()
            .filter(|record| record.state == state)
            .map(|record| record.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn count_in_state(&self, state: NodeState) -> usize {
        self.records
            .values()
            .filter(|record| record.state == state)
            .count()
    }

    pub fn all_records(&self) -> Vec<MemberRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One failure-detection sweep over the Active records.
    ///
    /// Records overdue by more than `timeout_secs` collect a strike; the
    /// rest have their strikes reset. Returns the ids that reached the
    /// strike threshold — the caller force-removes them after dropping
    /// this table's lock.
    pub fn sweep_failures(&mut self, timeout_secs: u64, now: Timestamp) -> Vec<NodeId> {
        let mut overdue = Vec::new();
        for record in self.records.values_mut() {
            if record.state != NodeState::Active {
                continue;
            }
            if record.last_seen.has_expired(timeout_secs, now) {
                record.failure_count += 1;
                if record.failure_count >= self.failure_threshold {
                    overdue.push(record.id);
                }
            } else {
                record.failure_count = 0;
            }
        }
        overdue.sort_unstable();
        overdue
    }
}
