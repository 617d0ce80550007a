//! Routing strategy selection, the precomputed routing table, and
//! forwarding statistics.
//!
//! The table maps every reachable destination to its BFS next hop and hop
//! count. It is rebuilt every refresh period and opportunistically after
//! topology changes; between rebuilds the orchestrator still falls back to
//! a fresh BFS for correctness, so the table is a cache, not the truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lattice_types::{NodeId, Timestamp};

use crate::topology::TopologyGraph;

/// How an outbound message travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Hand to the peer when directly connected, else fall back to
    /// shortest path.
    Direct,
    /// BFS next hop toward the destination.
    ShortestPath,
    /// Forward to every peer except the original sender, with duplicate
    /// suppression via the seen-set.
    Flood,
}

/// One precomputed route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub next_hop: NodeId,
    pub hop_count: usize,
    pub refreshed: Timestamp,
}

/// Destination → next hop table.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the whole table from the topology: one BFS per registered
    /// node other than `local`. Unreachable nodes get no entry.
    pub fn rebuild(&mut self, topology: &TopologyGraph, local: NodeId, now: Timestamp) {
        self.routes.clear();
        for target in topology.node_ids() {
            if target == local {
                continue;
            }
            let path = topology.find_path(local, target);
            if path.len() > 1 {
                self.routes.insert(
                    target,
                    RouteEntry {
                        next_hop: path[1],
                        hop_count: path.len() - 1,
                        refreshed: now,
                    },
                );
            }
        }
    }

    pub fn next_hop(&self, target: NodeId) -> Option<NodeId> {
        self.routes.get(&target).map(|entry| entry.next_hop)
    }

    pub fn hop_count(&self, target: NodeId) -> Option<usize> {
        self.routes.get(&target).map(|entry| entry.hop_count)
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Thread-safe routing statistics, updated without taking any lock.
#[derive(Debug, Default)]
pub struct RouteStats {
    routed: AtomicU64,
    forwarded: AtomicU64,
    total_hops: AtomicU64,
    flood_suppressed: AtomicU64,
}

impl RouteStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hops(&self, hops: u64) {
        self.total_hops.fetch_add(hops, Ordering::Relaxed);
    }

    pub fn record_flood_suppressed(&self) {
        self.flood_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn flood_suppressed(&self) -> u64 {
        self.flood_suppressed.load(Ordering::Relaxed)
    }

    /// Mean hops per routed message; zero before anything was routed.
    pub fn average_hop_count(&self) -> f64 {
        let routed = self.routed();
        if routed == 0 {
            return 0.0;
        }
        self.total_hops.load(Ordering::Relaxed) as f64 / routed as f64
    }
}
