//! The overlay topology: node registry plus undirected adjacency.
//!
//! Invariants maintained by every operation:
//! - every key in the adjacency map is registered;
//! - edges are symmetric;
//! - no self-loops;
//! - removing a node clears it from the registry and from every other
//!   node's adjacency set in one call (the caller holds the topology lock
//!   across the whole operation).
//!
//! Ordered maps give deterministic iteration, which the ring repair and
//! BFS tie-breaking rely on.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use lattice_types::{NetworkAddress, NodeId, OverlayError};

/// Registry + adjacency for every node this node knows about.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    registry: BTreeMap<NodeId, NetworkAddress>,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registry ────────────────────────────────────────────────────────

    /// Register a node. Does not create any edges.
    pub fn add_node(&mut self, id: NodeId, address: NetworkAddress) -> Result<(), OverlayError> {
        if self.registry.contains_key(&id) {
            return Err(OverlayError::AlreadyPresent(id));
        }
        self.registry.insert(id, address);
        self.adjacency.insert(id, BTreeSet::new());
        Ok(())
    }

    /// Unregister a node and drop every edge touching it. A second call
    /// for the same id fails with `NotFound`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), OverlayError> {
        if self.registry.remove(&id).is_none() {
            return Err(OverlayError::NotFound(format!("node {id}")));
        }
        self.adjacency.remove(&id);
        for neighbors in self.adjacency.values_mut() {
            neighbors.remove(&id);
        }
        Ok(())
    }

    /// Overwrite a registered node's address.
    pub fn update_node_address(
        &mut self,
        id: NodeId,
        address: NetworkAddress,
    ) -> Result<(), OverlayError> {
        match self.registry.get_mut(&id) {
            Some(slot) => {
                *slot = address;
                Ok(())
            }
            None => Err(OverlayError::NotFound(format!("node {id}"))),
        }
    }

    pub fn node_exists(&self, id: NodeId) -> bool {
        self.registry.contains_key(&id)
    }

    pub fn address_of(&self, id: NodeId) -> Option<&NetworkAddress> {
        self.registry.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.registry.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // ── Edges ───────────────────────────────────────────────────────────

    /// Add an undirected edge. Self-loops are silently ignored; unknown
    /// endpoints fail so the adjacency map never grows orphan keys.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> Result<(), OverlayError> {
        if a == b {
            return Ok(());
        }
        if !self.registry.contains_key(&a) {
            return Err(OverlayError::NotFound(format!("node {a}")));
        }
        if !self.registry.contains_key(&b) {
            return Err(OverlayError::NotFound(format!("node {b}")));
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        Ok(())
    }

    /// Remove an undirected edge. Absent edges are a no-op.
    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) {
        if let Some(neighbors) = self.adjacency.get_mut(&a) {
            neighbors.remove(&b);
        }
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.remove(&a);
        }
    }

    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency
            .get(&a)
            .is_some_and(|neighbors| neighbors.contains(&b))
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    // ── Path finding ────────────────────────────────────────────────────

    /// Breadth-first shortest path from `from` to `to`, both endpoints
    /// included. Returns `[from]` when the endpoints coincide and an empty
    /// vector when `to` is unreachable. Ties break by adjacency iteration
    /// order, which is stable.
    pub fn find_path(&self, from: NodeId, to: NodeId) -> Vec<NodeId> {
        if from == to {
            return vec![from];
        }

        let mut queue = VecDeque::new();
        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut node = to;
                while node != from {
                    node = parent[&node];
                    path.push(node);
                }
                path.reverse();
                return path;
            }

            if let Some(neighbors) = self.adjacency.get(&current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }

        Vec::new()
    }

    // ── Connectivity ────────────────────────────────────────────────────

    /// Whether every registered node is reachable from every other.
    /// Empty and single-node graphs count as connected.
    pub fn is_connected(&self) -> bool {
        if self.registry.len() <= 1 {
            return true;
        }

        let start = match self.registry.keys().next() {
            Some(&id) => id,
            None => return true,
        };

        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack = vec![start];
        visited.insert(start);

        while let Some(current) = stack.pop() {
            if let Some(neighbors) = self.adjacency.get(&current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }

        visited.len() == self.registry.len()
    }

    /// Drop adjacency entries whose key is no longer registered, and prune
    /// dangling references to unregistered nodes from the surviving sets.
    pub fn validate(&mut self) {
        let registered: BTreeSet<NodeId> = self.registry.keys().copied().collect();
        self.adjacency.retain(|id, _| registered.contains(id));
        for neighbors in self.adjacency.values_mut() {
            neighbors.retain(|id| registered.contains(id));
        }
    }

    /// Validate, then — as a last resort when the graph is still
    /// disconnected — connect all nodes in a ring over registry iteration
    /// order. Returns whether the graph is connected afterwards.
    pub fn repair(&mut self) -> bool {
        self.validate();

        if !self.is_connected() && self.registry.len() > 1 {
            let ids = self.node_ids();
            let n = ids.len();
            tracing::info!(nodes = n, "topology disconnected, applying ring repair");
            for i in 0..n {
                // Both endpoints are registered, so this cannot fail.
                let _ = self.add_edge(ids[i], ids[(i + 1) % n]);
            }
        }

        self.is_connected()
    }

    // ── Peer discovery ──────────────────────────────────────────────────

    /// Up to `max_peers` registered ids, excluding the requester and the
    /// local node.
    pub fn discover_peers(
        &self,
        requesting: NodeId,
        local: NodeId,
        max_peers: usize,
    ) -> Vec<NodeId> {
        self.registry
            .keys()
            .copied()
            .filter(|&id| id != requesting && id != local)
            .take(max_peers)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NetworkAddress {
        NetworkAddress::new("127.0.0.1", port)
    }

    fn graph_with(ids: &[u64]) -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        for &id in ids {
            graph.add_node(NodeId::new(id), addr(8000 + id as u16)).unwrap();
        }
        graph
    }

    fn n(id: u64) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut graph = graph_with(&[1]);
        assert_eq!(
            graph.add_node(n(1), addr(9000)),
            Err(OverlayError::AlreadyPresent(n(1)))
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn remove_node_clears_registry_and_all_edges() {
        let mut graph = graph_with(&[1, 2, 3]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(3)).unwrap();

        graph.remove_node(n(2)).unwrap();

        assert!(!graph.node_exists(n(2)));
        assert!(graph.neighbors(n(1)).is_empty());
        assert!(graph.neighbors(n(3)).is_empty());
        // Idempotence: a second removal fails.
        assert!(matches!(
            graph.remove_node(n(2)),
            Err(OverlayError::NotFound(_))
        ));
    }

    #[test]
    fn update_address_overwrites_or_fails() {
        let mut graph = graph_with(&[1]);
        graph.update_node_address(n(1), addr(9999)).unwrap();
        assert_eq!(graph.address_of(n(1)), Some(&addr(9999)));
        assert!(graph.update_node_address(n(2), addr(1)).is_err());
    }

    #[test]
    fn edges_are_symmetric_and_self_loops_ignored() {
        let mut graph = graph_with(&[1, 2]);
        graph.add_edge(n(1), n(2)).unwrap();
        assert!(graph.has_edge(n(1), n(2)));
        assert!(graph.has_edge(n(2), n(1)));

        graph.add_edge(n(1), n(1)).unwrap();
        assert!(!graph.has_edge(n(1), n(1)));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn add_edge_rejects_unregistered_endpoints() {
        let mut graph = graph_with(&[1]);
        assert!(graph.add_edge(n(1), n(9)).is_err());
        assert!(graph.add_edge(n(9), n(1)).is_err());
        assert!(graph.neighbors(n(1)).is_empty());
    }

    #[test]
    fn remove_edge_is_noop_when_absent() {
        let mut graph = graph_with(&[1, 2]);
        graph.remove_edge(n(1), n(2));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn find_path_trivial_cases() {
        let graph = graph_with(&[1, 2]);
        assert_eq!(graph.find_path(n(1), n(1)), vec![n(1)]);
        assert!(graph.find_path(n(1), n(2)).is_empty());
    }

    #[test]
    fn find_path_is_shortest_in_three_node_ring() {
        // Ring 1-2, 2-3, 3-1: the direct edge always wins over the detour.
        let mut graph = graph_with(&[1, 2, 3]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(3)).unwrap();
        graph.add_edge(n(3), n(1)).unwrap();

        let path = graph.find_path(n(1), n(3));
        assert_eq!(path, vec![n(1), n(3)]);
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn find_path_crosses_a_chain() {
        let mut graph = graph_with(&[1, 2, 3, 4]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(3)).unwrap();
        graph.add_edge(n(3), n(4)).unwrap();

        assert_eq!(graph.find_path(n(1), n(4)), vec![n(1), n(2), n(3), n(4)]);
    }

    #[test]
    fn bfs_returns_minimum_hop_path() {
        // Two routes from 1 to 5: 1-2-5 (2 hops) and 1-3-4-5 (3 hops).
        let mut graph = graph_with(&[1, 2, 3, 4, 5]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(5)).unwrap();
        graph.add_edge(n(1), n(3)).unwrap();
        graph.add_edge(n(3), n(4)).unwrap();
        graph.add_edge(n(4), n(5)).unwrap();

        assert_eq!(graph.find_path(n(1), n(5)), vec![n(1), n(2), n(5)]);
    }

    #[test]
    fn connectivity_of_empty_and_single() {
        assert!(TopologyGraph::new().is_connected());
        assert!(graph_with(&[1]).is_connected());
    }

    #[test]
    fn connectivity_detects_partition() {
        let mut graph = graph_with(&[1, 2, 3, 4]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(3), n(4)).unwrap();
        assert!(!graph.is_connected());

        graph.add_edge(n(2), n(3)).unwrap();
        assert!(graph.is_connected());
    }

    #[test]
    fn repair_connects_chain_remnants_into_ring() {
        // Chain 1-2-3; removing 2 leaves {1, 3} disconnected.
        let mut graph = graph_with(&[1, 2, 3]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(3)).unwrap();

        graph.remove_node(n(2)).unwrap();
        assert!(!graph.is_connected());

        assert!(graph.repair());
        assert!(graph.is_connected());
        assert!(graph.has_edge(n(1), n(3)));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn repair_leaves_connected_graph_untouched() {
        let mut graph = graph_with(&[1, 2]);
        graph.add_edge(n(1), n(2)).unwrap();
        assert!(graph.repair());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn repair_ring_order_is_deterministic() {
        let mut graph = graph_with(&[5, 1, 3]);
        assert!(graph.repair());
        // Registry iterates in id order: ring is 1-3, 3-5, 5-1.
        assert!(graph.has_edge(n(1), n(3)));
        assert!(graph.has_edge(n(3), n(5)));
        assert!(graph.has_edge(n(5), n(1)));
    }

    #[test]
    fn discover_peers_excludes_requester_and_local() {
        let graph = graph_with(&[1, 2, 3, 4, 5]);
        let peers = graph.discover_peers(n(2), n(1), 10);
        assert_eq!(peers, vec![n(3), n(4), n(5)]);

        let capped = graph.discover_peers(n(2), n(1), 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn symmetry_and_closure_hold_after_mutation_storm() {
        let mut graph = graph_with(&[1, 2, 3, 4, 5]);
        graph.add_edge(n(1), n(2)).unwrap();
        graph.add_edge(n(2), n(3)).unwrap();
        graph.add_edge(n(3), n(4)).unwrap();
        graph.add_edge(n(4), n(5)).unwrap();
        graph.add_edge(n(5), n(1)).unwrap();
        graph.remove_node(n(3)).unwrap();
        graph.remove_edge(n(4), n(5));
        graph.repair();

        for a in graph.node_ids() {
            for b in graph.neighbors(a) {
                assert!(graph.has_edge(b, a), "edge {a}-{b} not symmetric");
                assert!(graph.node_exists(b), "neighbor {b} not registered");
            }
        }
    }
}
