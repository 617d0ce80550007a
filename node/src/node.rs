//! The overlay node — wires every subsystem together.
//!
//! Each shared resource sits behind its own mutex; composite operations
//! take locks in a fixed order (topology → membership → routing/seen →
//! reliable → transfers/chunks → peer roster) and never hold one across a
//! transport call they can avoid or across an event emission. Background
//! maintenance runs as tokio tasks that `select!` on a node-owned
//! broadcast shutdown channel; `stop` signals it and joins every task
//! before the transport is torn down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use lattice_messages::{payload::TransferOffer, Chunk, Message};
use lattice_net::{
    RouteStats, RoutingStrategy, RoutingTable, SeenMessages, TopologyGraph, Transport,
};
use lattice_types::{params, NetworkAddress, NodeId, OverlayError, Timestamp};

use crate::config::NodeConfig;
use crate::discovery::DiscoveryCache;
use crate::events::{EventBus, OverlayEvent};
use crate::exchange::{split_chunks, ChunkAssembly, TransferRecord, TransferStatus, TransferTable};
use crate::membership::{MemberRecord, MembershipTable, NodeState};
use crate::metrics::OverlayMetrics;
use crate::registration::{AdmissionPolicy, AuthPredicate};
use crate::reliable::{AckOutcome, PendingTable};
use crate::roster::LocalNode;

/// Receiver-side chunk storage: per-transfer reassembly buffers and the
/// payloads already published.
#[derive(Default)]
pub(crate) struct ChunkStore {
    pub(crate) assemblies: HashMap<u64, ChunkAssembly>,
    pub(crate) completed: HashMap<u64, Vec<u8>>,
}

/// Lock a subsystem mutex, recovering nothing: a poisoned lock means a
/// panic already tore through an invariant, so propagating it is correct.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("subsystem lock poisoned")
}

/// A running overlay node.
pub struct OverlayNode {
    pub(crate) config: NodeConfig,
    pub(crate) local: Arc<LocalNode>,
    pub(crate) topology: Mutex<TopologyGraph>,
    pub(crate) membership: Mutex<MembershipTable>,
    pub(crate) routing: Mutex<RoutingTable>,
    pub(crate) seen: Mutex<SeenMessages>,
    pub(crate) pending: Mutex<PendingTable>,
    pub(crate) transfers: Mutex<TransferTable>,
    pub(crate) chunks: Mutex<ChunkStore>,
    pub(crate) discovery: Mutex<DiscoveryCache>,
    pub(crate) admission: AdmissionPolicy,
    pub(crate) route_stats: RouteStats,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventBus,
    pub(crate) metrics: OverlayMetrics,
    /// The bootstrap address we connected to and are waiting to identify
    /// through its join response.
    pub(crate) pending_bootstrap: Mutex<Option<NetworkAddress>>,
    /// Every background loop holds a receiver on this channel; one send
    /// winds them all down.
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Back-reference to our own `Arc`, for handing clones to the
    /// background tasks.
    self_ref: Weak<OverlayNode>,
}

impl OverlayNode {
    /// Build a node from its configuration and a transport adapter.
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let id = config.resolve_node_id();
        let address = config.listen_address();
        let local = Arc::new(LocalNode::new(id, address.clone(), config.max_peers));
        let admission = AdmissionPolicy::new(id, address.clone());

        // The local node is part of its own map: BFS paths start from it.
        let mut topology = TopologyGraph::new();
        topology
            .add_node(id, address)
            .expect("empty topology accepts the local node");

        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new_cyclic(|self_ref| Self {
            config,
            local,
            topology: Mutex::new(topology),
            membership: Mutex::new(MembershipTable::new(params::FAILURE_THRESHOLD)),
            routing: Mutex::new(RoutingTable::new()),
            seen: Mutex::new(SeenMessages::new()),
            pending: Mutex::new(PendingTable::new()),
            transfers: Mutex::new(TransferTable::new()),
            chunks: Mutex::new(ChunkStore::default()),
            discovery: Mutex::new(DiscoveryCache::new()),
            admission,
            route_stats: RouteStats::new(),
            transport,
            events: EventBus::new(),
            metrics: OverlayMetrics::new(),
            pending_bootstrap: Mutex::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn id(&self) -> NodeId {
        self.local.id()
    }

    pub fn address(&self) -> &NetworkAddress {
        self.local.address()
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &OverlayMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn route_stats(&self) -> &RouteStats {
        &self.route_stats
    }

    /// Install (or clear) the admission authorization predicate.
    pub fn set_authorizer(&self, predicate: Option<AuthPredicate>) {
        self.admission.set_authorizer(predicate);
    }

    pub(crate) fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Mark the node active, contact the configured bootstraps, and spawn
    /// the background maintenance loops.
    pub async fn start(&self) {
        self.local.set_active(true);
        self.local.update_last_seen(self.now());
        tracing::info!(id = %self.id(), address = %self.address(), "starting overlay node");

        if !self.config.bootstrap_peers.is_empty() && !self.join_network() {
            tracing::warn!("no bootstrap node reachable, starting isolated");
        }

        self.spawn_loop("heartbeat", self.config.heartbeat_interval_secs, |node| {
            node.heartbeat_sweep();
        });
        self.spawn_loop("route-refresh", params::ROUTE_REFRESH_SECS, |node| {
            node.refresh_routing_table();
        });
        self.spawn_loop("integrity", params::INTEGRITY_SWEEP_SECS, |node| {
            node.maintain_network_integrity();
        });
        self.spawn_loop("cleanup", params::CLEANUP_INTERVAL_SECS, |node| {
            node.cleanup_sweep();
        });
    }

    /// Signal the background loops, join them, then drop every transport
    /// session. The loops are gone before the transport is torn down.
    pub async fn stop(&self) {
        tracing::info!(id = %self.id(), "stopping overlay node");
        self.local.set_active(false);
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = locked(&self.tasks).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        for peer in self.local.peer_ids() {
            self.transport.disconnect(peer);
        }
    }

    /// Block until SIGINT/SIGTERM, signal the background loops, then
    /// return (the caller runs `stop` to join them).
    pub async fn wait_for_shutdown(&self) {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!(id = %self.id(), "received SIGINT, shutting down");
            }
            _ = terminate => {
                tracing::info!(id = %self.id(), "received SIGTERM, shutting down");
            }
        }

        let _ = self.shutdown_tx.send(());
    }

    fn spawn_loop(&self, name: &'static str, period_secs: u64, tick: fn(&OverlayNode)) {
        // Every `&self` lives inside the `Arc` built by `new`, so the
        // upgrade cannot fail while we are running.
        let node = self.self_ref.upgrade().expect("node is owned by an Arc");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(&node),
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = name, "background loop stopping");
                        break;
                    }
                }
            }
        });
        locked(&self.tasks).push(handle);
    }

    // ── Discovery & join ────────────────────────────────────────────────

    /// Contact the configured bootstrap addresses.
    pub fn join_network(&self) -> bool {
        let bootstraps = self.config.bootstrap_addresses();
        self.discover_network(&bootstraps)
    }

    /// Walk the bootstrap list and adopt the first address the transport
    /// can reach, then introduce ourselves with a join request. On total
    /// failure every candidate gets a `DiscoveryFailed` event.
    pub fn discover_network(&self, bootstraps: &[NetworkAddress]) -> bool {
        if bootstraps.is_empty() {
            tracing::debug!("no bootstrap addresses configured");
            return false;
        }

        for address in bootstraps {
            if self.transport.connect(address) {
                tracing::info!(%address, "connected to bootstrap node");
                // We do not know the bootstrap's id yet; its join response
                // will identify it. Until then the join request rides as a
                // broadcast over the one session we just opened, carrying
                // our id and advertised address.
                *locked(&self.pending_bootstrap) = Some(address.clone());
                let request = Message::join_request(
                    self.id(),
                    NodeId::BROADCAST,
                    self.address(),
                    self.now(),
                );
                self.transport.broadcast(&request, NodeId::BROADCAST);
                return true;
            }
            tracing::warn!(%address, "bootstrap connect failed");
        }

        for address in bootstraps {
            self.events.emit(&OverlayEvent::DiscoveryFailed {
                address: address.clone(),
            });
        }
        false
    }

    /// Surface up to `max_peers` registered nodes we are not connected to,
    /// refreshing the discovery cache and firing `PeerDiscovered` each.
    pub fn discover_peers(&self, max_peers: usize) -> Vec<NodeId> {
        let now = self.now();
        let candidates: Vec<(NodeId, NetworkAddress)> = {
            let topology = locked(&self.topology);
            topology
                .node_ids()
                .into_iter()
                .filter(|&id| id != self.id() && !self.local.has_peer(id))
                .filter_map(|id| topology.address_of(id).map(|a| (id, a.clone())))
                .take(max_peers)
                .collect()
        };

        {
            let mut cache = locked(&self.discovery);
            for (id, address) in &candidates {
                cache.record(*id, address.clone(), now);
            }
        }

        let mut discovered = Vec::with_capacity(candidates.len());
        for (id, address) in candidates {
            discovered.push(id);
            self.events
                .emit(&OverlayEvent::PeerDiscovered { id, address });
        }
        discovered
    }

    /// Announce departure, then drop every session.
    pub fn leave_network(&self) {
        tracing::info!(id = %self.id(), "leaving the overlay");
        let notice = Message::leave_notification(self.id(), self.now());
        self.transport.broadcast(&notice, NodeId::BROADCAST);
        self.local.set_active(false);
        for peer in self.local.peer_ids() {
            self.transport.disconnect(peer);
            let _ = self.local.remove_peer(peer);
        }
        self.refresh_gauges();
    }

    // ── Membership ──────────────────────────────────────────────────────

    /// Admit a node: register it in the topology, adopt it as a peer when
    /// the roster has room, and tell the overlay.
    pub fn add_node(&self, id: NodeId, address: NetworkAddress) -> Result<(), OverlayError> {
        if id.is_broadcast() {
            return Err(OverlayError::InvalidArgument(
                "node id 0 is reserved".to_string(),
            ));
        }
        if id == self.id() {
            return Err(OverlayError::InvalidArgument(format!(
                "node {id} is our own identity"
            )));
        }
        if address.is_unspecified() {
            return Err(OverlayError::InvalidArgument(format!(
                "unusable address {address}"
            )));
        }

        let now = self.now();
        {
            let mut topology = locked(&self.topology);
            let mut membership = locked(&self.membership);
            topology.add_node(id, address.clone())?;
            let _ = membership.insert_joining(id, address.clone(), now);
            membership.mark_active(id);
        }

        self.adopt_peer(id, &address);

        tracing::info!(node = %id, %address, "node added");
        self.sync_topology_shadow();
        self.refresh_gauges();
        self.events.emit(&OverlayEvent::NodeAdded { id, address });
        self.propagate_topology_update(&[id], NodeId::BROADCAST);
        Ok(())
    }

    /// Admit a batch, returning the ids that went in.
    pub fn add_nodes_from_list(&self, nodes: &[(NodeId, NetworkAddress)]) -> Vec<NodeId> {
        nodes
            .iter()
            .filter(|(id, address)| self.add_node(*id, address.clone()).is_ok())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Graceful removal: Leaving, then gone.
    pub fn remove_node_graceful(&self, id: NodeId) -> Result<(), OverlayError> {
        self.remove_node_common(id, true, NodeId::BROADCAST)
    }

    /// Forced removal: Failed, then gone.
    pub fn remove_node_forced(&self, id: NodeId) -> Result<(), OverlayError> {
        self.remove_node_common(id, false, NodeId::BROADCAST)
    }

    pub(crate) fn remove_node_common(
        &self,
        id: NodeId,
        graceful: bool,
        broadcast_exclude: NodeId,
    ) -> Result<(), OverlayError> {
        {
            let mut topology = locked(&self.topology);
            let mut membership = locked(&self.membership);
            if !topology.node_exists(id) {
                return Err(OverlayError::NotFound(format!("node {id}")));
            }
            if graceful {
                membership.mark_leaving(id);
            } else {
                membership.mark_failed(id);
            }
            topology.remove_node(id)?;
            membership.remove(id);
        }

        let _ = self.local.remove_peer(id);
        self.transport.disconnect(id);
        self.sync_topology_shadow();

        if graceful {
            tracing::info!(node = %id, "node removed gracefully");
            self.events.emit(&OverlayEvent::NodeRemoved { id });
        } else {
            tracing::warn!(node = %id, "node force-removed");
            self.events.emit(&OverlayEvent::NodeFailed { id });
        }

        self.repair_after_removal(id);
        self.propagate_topology_update(&[id], broadcast_exclude);
        self.refresh_gauges();
        Ok(())
    }

    fn repair_after_removal(&self, removed: NodeId) {
        let repaired = {
            let mut topology = locked(&self.topology);
            if topology.is_connected() {
                None
            } else {
                Some(topology.repair())
            }
        };

        for id in self.find_replacement_connections(removed) {
            if self.local.roster_is_full() {
                break;
            }
            let address = { locked(&self.topology).address_of(id).cloned() };
            if let Some(address) = address {
                self.adopt_peer(id, &address);
            }
        }

        self.refresh_routing_table();
        if repaired == Some(true) {
            self.events.emit(&OverlayEvent::NetworkRepaired);
        }
    }

    /// Registered nodes that could replace a lost peer: not us, not the
    /// removed node, not already in the roster.
    pub fn find_replacement_connections(&self, removed: NodeId) -> Vec<NodeId> {
        let ids = { locked(&self.topology).node_ids() };
        ids.into_iter()
            .filter(|&id| id != self.id() && id != removed && !self.local.has_peer(id))
            .collect()
    }

    /// One failure-detection pass: sweep the membership records, then
    /// force-remove every peer that collected three strikes. Removal
    /// happens after the record lock is released.
    pub fn detect_failed_nodes(&self, timeout_secs: u64) {
        let now = self.now();
        let overdue = { locked(&self.membership).sweep_failures(timeout_secs, now) };
        for id in overdue {
            tracing::warn!(node = %id, "liveness deadline exceeded, force-removing");
            if let Err(e) = self.remove_node_forced(id) {
                tracing::debug!(node = %id, error = %e, "failed node already gone");
            }
        }
    }

    /// The integrity sweep: validate, repair when partitioned, run failure
    /// detection, and opportunistically refill the peer roster. Returns
    /// whether the topology ended up connected.
    pub fn maintain_network_integrity(&self) -> bool {
        let repaired = {
            let mut topology = locked(&self.topology);
            topology.validate();
            if topology.is_connected() {
                None
            } else {
                tracing::warn!("topology disconnected, attempting repair");
                Some(topology.repair())
            }
        };
        if repaired == Some(true) {
            self.events.emit(&OverlayEvent::NetworkRepaired);
        }

        self.detect_failed_nodes(self.config.node_timeout_secs);
        self.ensure_connectivity()
    }

    /// Fill the roster up to its cap from registered non-peers.
    pub fn ensure_connectivity(&self) -> bool {
        let candidates: Vec<(NodeId, NetworkAddress)> = {
            let topology = locked(&self.topology);
            topology
                .node_ids()
                .into_iter()
                .filter_map(|id| topology.address_of(id).map(|a| (id, a.clone())))
                .collect()
        };

        for (id, address) in candidates {
            if self.local.roster_is_full() {
                break;
            }
            if id == self.id() || self.local.has_peer(id) {
                continue;
            }
            self.adopt_peer(id, &address);
        }

        self.sync_topology_shadow();
        self.refresh_gauges();
        locked(&self.topology).is_connected()
    }

    /// Take a registered node into the peer roster, open its transport
    /// session, and record the session as an overlay link.
    pub(crate) fn adopt_peer(&self, id: NodeId, address: &NetworkAddress) -> bool {
        if self.local.roster_is_full() || self.local.add_peer(id, address.clone()).is_err() {
            return false;
        }
        if !self.transport.connect(address) {
            tracing::warn!(node = %id, %address, "transport connect failed for new peer");
        }
        let _ = locked(&self.topology).add_edge(self.id(), id);
        true
    }

    /// Broadcast a topology update naming the changed ids.
    pub fn propagate_topology_update(&self, updated: &[NodeId], exclude: NodeId) {
        if updated.is_empty() || self.local.peer_count() == 0 {
            return;
        }
        let message = Message::topology_update(self.id(), updated, self.now());
        self.transport.broadcast(&message, exclude);
    }

    pub fn node_state(&self, id: NodeId) -> NodeState {
        locked(&self.membership).state_of(id)
    }

    pub fn member_records(&self) -> Vec<MemberRecord> {
        locked(&self.membership).all_records()
    }

    pub fn active_node_count(&self) -> usize {
        locked(&self.membership).count_in_state(NodeState::Active)
    }

    pub fn failed_node_count(&self) -> usize {
        locked(&self.membership).count_in_state(NodeState::Failed)
    }

    pub fn known_node_count(&self) -> usize {
        locked(&self.topology).len()
    }

    // ── Topology operations ─────────────────────────────────────────────

    /// Record an overlay link between two known nodes.
    pub fn add_link(&self, a: NodeId, b: NodeId) -> Result<(), OverlayError> {
        let result = { locked(&self.topology).add_edge(a, b) };
        self.refresh_routing_table();
        self.sync_topology_shadow();
        result
    }

    pub fn remove_link(&self, a: NodeId, b: NodeId) {
        {
            locked(&self.topology).remove_edge(a, b);
        }
        self.refresh_routing_table();
        self.sync_topology_shadow();
    }

    pub fn update_node_address(
        &self,
        id: NodeId,
        address: NetworkAddress,
    ) -> Result<(), OverlayError> {
        locked(&self.topology).update_node_address(id, address)
    }

    pub fn is_topology_connected(&self) -> bool {
        locked(&self.topology).is_connected()
    }

    pub fn topology_node_exists(&self, id: NodeId) -> bool {
        locked(&self.topology).node_exists(id)
    }

    pub fn topology_address_of(&self, id: NodeId) -> Option<NetworkAddress> {
        locked(&self.topology).address_of(id).cloned()
    }

    fn sync_topology_shadow(&self) {
        let neighbors = { locked(&self.topology).neighbors(self.id()) };
        self.local.set_neighbors(neighbors);
    }

    // ── Routing ─────────────────────────────────────────────────────────

    /// Route one message. `Ok(true)` means the transport took it at least
    /// once; `Ok(false)` means a flooded duplicate was dropped silently.
    pub fn route_message(
        &self,
        message: &Message,
        strategy: RoutingStrategy,
    ) -> Result<bool, OverlayError> {
        self.route_stats.record_routed();
        self.metrics.messages_routed.inc();

        match strategy {
            RoutingStrategy::Direct => {
                if self.local.has_peer(message.receiver) {
                    if self.transport.send(message.receiver, message) {
                        Ok(true)
                    } else {
                        Err(OverlayError::TransportFailure(format!(
                            "send to {}",
                            message.receiver
                        )))
                    }
                } else {
                    self.route_shortest_path(message)
                }
            }
            RoutingStrategy::ShortestPath => self.route_shortest_path(message),
            RoutingStrategy::Flood => self.flood(message),
        }
    }

    fn route_shortest_path(&self, message: &Message) -> Result<bool, OverlayError> {
        let target = message.receiver;
        let path = { locked(&self.topology).find_path(self.id(), target) };
        if path.len() < 2 {
            return Err(OverlayError::Unreachable(target));
        }

        let next_hop = path[1];
        self.route_stats.add_hops((path.len() - 1) as u64);
        if self.transport.send(next_hop, message) {
            Ok(true)
        } else {
            Err(OverlayError::TransportFailure(format!(
                "send to next hop {next_hop}"
            )))
        }
    }

    fn flood(&self, message: &Message) -> Result<bool, OverlayError> {
        let fingerprint =
            SeenMessages::fingerprint(message.sender, message.receiver, message.timestamp);
        let fresh = { locked(&self.seen).observe(fingerprint, self.now()) };
        if !fresh {
            self.route_stats.record_flood_suppressed();
            self.metrics.flood_suppressed.inc();
            return Ok(false);
        }

        for peer in self.local.peer_ids() {
            if peer != message.sender && !self.transport.send(peer, message) {
                tracing::debug!(peer = %peer, "flood hand-off failed");
            }
        }
        self.route_stats.record_forwarded();
        self.metrics.messages_forwarded.inc();
        Ok(true)
    }

    /// Recompute the next-hop table from the current topology.
    pub fn refresh_routing_table(&self) {
        let now = self.now();
        let topology = locked(&self.topology);
        let mut routing = locked(&self.routing);
        routing.rebuild(&topology, self.id(), now);
    }

    pub fn is_reachable(&self, target: NodeId) -> bool {
        !locked(&self.topology).find_path(self.id(), target).is_empty()
    }

    /// Hops to the target, `None` when unreachable.
    pub fn hop_count(&self, target: NodeId) -> Option<usize> {
        let path = locked(&self.topology).find_path(self.id(), target);
        if path.is_empty() {
            None
        } else {
            Some(path.len() - 1)
        }
    }

    pub fn next_hop(&self, target: NodeId) -> Option<NodeId> {
        locked(&self.routing).next_hop(target)
    }

    pub fn average_hop_count(&self) -> f64 {
        self.route_stats.average_hop_count()
    }

    // ── Reliable messaging ──────────────────────────────────────────────

    /// Send with acknowledgment tracking. Returns the message id to
    /// correlate the ack; an initial hand-off failure fails the record
    /// immediately and surfaces as a transport error.
    pub fn send_reliable(&self, target: NodeId, message: Message) -> Result<u64, OverlayError> {
        let now = self.now();
        let message_id = PendingTable::generate_message_id();
        {
            locked(&self.pending).track(message_id, message.clone(), target, now);
        }

        if self.transport.send(target, &message) {
            locked(&self.pending).note_sent();
            self.metrics.reliable_sent.inc();
            self.refresh_gauges();
            Ok(message_id)
        } else {
            let record = locked(&self.pending).fail(message_id);
            self.metrics.reliable_failed.inc();
            if let Some(record) = record {
                self.events.emit(&OverlayEvent::MessageFailed {
                    message_id: record.message_id,
                    peer: record.destination,
                });
            }
            Err(OverlayError::TransportFailure(format!(
                "reliable send to {target}"
            )))
        }
    }

    /// Correlate an inbound ack. Idempotent: the delivered event fires on
    /// the first ack only. Returns whether the id was known.
    pub fn acknowledge_message(&self, message_id: u64, sender: NodeId) -> bool {
        let outcome = { locked(&self.pending).acknowledge(message_id) };
        match outcome {
            AckOutcome::Delivered(_) => {
                self.metrics.reliable_acknowledged.inc();
                self.refresh_gauges();
                self.events.emit(&OverlayEvent::MessageDelivered {
                    message_id,
                    peer: sender,
                });
                true
            }
            AckOutcome::AlreadyAcknowledged => true,
            AckOutcome::Unknown => false,
        }
    }

    /// Re-send overdue pending messages; fail the ones past the retry cap.
    pub fn retry_pending(&self, timeout_secs: u64, max_retries: u32) {
        let now = self.now();
        let (to_resend, failed) =
            { locked(&self.pending).retry_due(timeout_secs, max_retries, now) };

        for (destination, message) in to_resend {
            if !self.transport.send(destination, &message) {
                tracing::debug!(peer = %destination, "reliable retry hand-off failed");
            }
        }
        for record in failed {
            tracing::warn!(
                message_id = record.message_id,
                peer = %record.destination,
                "reliable message failed after retries"
            );
            self.metrics.reliable_failed.inc();
            self.events.emit(&OverlayEvent::MessageFailed {
                message_id: record.message_id,
                peer: record.destination,
            });
        }
        self.refresh_gauges();
    }

    /// Percentage of reliable sends that were acknowledged.
    pub fn delivery_rate(&self) -> f64 {
        locked(&self.pending).delivery_rate()
    }

    // ── Data exchange ───────────────────────────────────────────────────

    /// Transfer a payload to `target` as ordered chunks over shortest-path
    /// routes. Returns the transfer id; any send failure fails the
    /// transfer. Cancellation is honored between chunks.
    pub fn send_data(
        &self,
        target: NodeId,
        data: &[u8],
        data_type: &str,
    ) -> Result<u64, OverlayError> {
        let now = self.now();
        let transfer_id = TransferTable::generate_transfer_id();
        {
            locked(&self.transfers).begin_outgoing(
                transfer_id,
                self.id(),
                target,
                data_type.to_string(),
                data.len(),
                now,
            );
        }
        self.refresh_gauges();

        // Pre-announce so the receiver records the size and data type
        // before the first chunk lands.
        let offer = TransferOffer {
            transfer_id,
            total_size: data.len() as u64,
            data_type: data_type.to_string(),
        };
        let request = Message::transfer_request(self.id(), target, &offer, now);
        if let Err(e) = self.route_message(&request, RoutingStrategy::ShortestPath) {
            self.fail_outgoing_transfer(transfer_id);
            return Err(e);
        }

        for chunk in split_chunks(data, self.config.chunk_size, transfer_id) {
            let cancelled = {
                locked(&self.transfers).outgoing_status(transfer_id)
                    == Some(TransferStatus::Cancelled)
            };
            if cancelled {
                tracing::info!(transfer_id, "transfer cancelled, stopping chunk emission");
                return Ok(transfer_id);
            }

            let chunk_len = chunk.data.len();
            let message = Message::data_chunk(self.id(), target, &chunk, self.now());
            if let Err(e) = self.route_message(&message, RoutingStrategy::ShortestPath) {
                self.fail_outgoing_transfer(transfer_id);
                return Err(e);
            }

            let progress = {
                let mut transfers = locked(&self.transfers);
                transfers.note_sent(transfer_id, chunk_len, self.now());
                transfers
                    .outgoing_record(transfer_id)
                    .map(|record| (record.transferred, record.total_size))
            };
            if let Some((transferred, total)) = progress {
                self.events.emit(&OverlayEvent::TransferProgress {
                    transfer_id,
                    transferred,
                    total,
                });
            }
        }

        let finished = {
            locked(&self.transfers).finish_outgoing(transfer_id, TransferStatus::Completed, self.now())
        };
        if finished.is_some() {
            self.metrics.transfers_completed.inc();
            self.events.emit(&OverlayEvent::TransferComplete {
                transfer_id,
                success: true,
            });
        }
        self.refresh_gauges();
        Ok(transfer_id)
    }

    fn fail_outgoing_transfer(&self, transfer_id: u64) {
        let finished = {
            locked(&self.transfers).finish_outgoing(transfer_id, TransferStatus::Failed, self.now())
        };
        if finished.is_some() {
            self.metrics.transfers_failed.inc();
            self.events.emit(&OverlayEvent::TransferComplete {
                transfer_id,
                success: false,
            });
        }
        self.refresh_gauges();
    }

    /// Cooperatively cancel an outgoing transfer.
    pub fn cancel_transfer(&self, transfer_id: u64) -> bool {
        let cancelled = locked(&self.transfers).cancel(transfer_id, self.now());
        if cancelled {
            self.refresh_gauges();
        }
        cancelled
    }

    /// Store one received chunk and, on completion, publish the payload.
    pub(crate) fn ingest_chunk(&self, source: NodeId, chunk: Chunk) {
        let now = self.now();
        let transfer_id = chunk.transfer_id;

        let added = {
            let mut chunks = locked(&self.chunks);
            chunks
                .assemblies
                .entry(transfer_id)
                .or_default()
                .insert(chunk)
        };
        {
            locked(&self.transfers).note_received(transfer_id, source, self.id(), added, now);
        }

        let completed: Option<Vec<u8>> = {
            let mut chunks = locked(&self.chunks);
            let reassembled = chunks
                .assemblies
                .get(&transfer_id)
                .and_then(ChunkAssembly::reassemble);
            match reassembled {
                Some(bytes) if !chunks.completed.contains_key(&transfer_id) => {
                    chunks.completed.insert(transfer_id, bytes.clone());
                    Some(bytes)
                }
                _ => None,
            }
        };

        let progress = {
            locked(&self.transfers)
                .incoming_record(transfer_id)
                .map(|record| (record.transferred, record.total_size))
        };
        if let Some((transferred, total)) = progress {
            self.events.emit(&OverlayEvent::TransferProgress {
                transfer_id,
                transferred,
                total,
            });
        }

        if let Some(bytes) = completed {
            let record =
                { locked(&self.transfers).finish_incoming(transfer_id, bytes.len(), now) };
            let (from, data_type) = record
                .map(|r| (r.source, r.data_type))
                .unwrap_or((source, String::new()));
            tracing::info!(transfer_id, bytes = bytes.len(), from = %from, "transfer complete");
            self.refresh_gauges();
            self.events.emit(&OverlayEvent::DataReceived {
                from,
                data: bytes,
                data_type,
            });
        }
    }

    /// The reassembled payload of a completed incoming transfer.
    pub fn received_data(&self, transfer_id: u64) -> Option<Vec<u8>> {
        locked(&self.chunks).completed.get(&transfer_id).cloned()
    }

    pub fn transfer_record(&self, transfer_id: u64) -> Option<TransferRecord> {
        locked(&self.transfers).record(transfer_id).cloned()
    }

    pub fn active_transfers(&self) -> Vec<TransferRecord> {
        locked(&self.transfers).active()
    }

    // ── Maintenance sweeps ──────────────────────────────────────────────

    fn heartbeat_sweep(&self) {
        let now = self.now();
        self.local.update_last_seen(now);

        for peer in self.local.peer_ids() {
            let probe = Message::heartbeat(self.id(), peer, now);
            if self.transport.send(peer, &probe) {
                self.metrics.heartbeats_sent.inc();
            } else {
                tracing::debug!(peer = %peer, "heartbeat hand-off failed");
            }
        }

        self.retry_pending(self.config.retry_timeout_secs, self.config.max_retries);
    }

    fn cleanup_sweep(&self) {
        let now = self.now();
        let dropped_seen = { locked(&self.seen).cleanup(params::SEEN_MESSAGE_TTL_SECS, now) };
        let dropped_acks =
            { locked(&self.pending).cleanup_acknowledged(params::CLEANUP_INTERVAL_SECS, now) };

        let removed = { locked(&self.transfers).cleanup(params::TRANSFER_CLEANUP_SECS, now) };
        {
            let mut chunks = locked(&self.chunks);
            for transfer_id in &removed {
                chunks.assemblies.remove(transfer_id);
                chunks.completed.remove(transfer_id);
            }
        }

        let stale = { locked(&self.discovery).remove_stale(params::DISCOVERY_STALE_SECS, now) };
        self.discover_peers(self.config.max_peers);

        tracing::debug!(
            dropped_seen,
            dropped_acks,
            transfers = removed.len(),
            stale,
            "cleanup sweep"
        );
        self.refresh_gauges();
    }

    pub(crate) fn refresh_gauges(&self) {
        self.metrics
            .known_nodes
            .set(locked(&self.topology).len() as i64);
        self.metrics
            .connected_peers
            .set(self.local.peer_count() as i64);
        self.metrics
            .pending_reliable
            .set(locked(&self.pending).pending_count() as i64);
        self.metrics
            .active_transfers
            .set(locked(&self.transfers).active().len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_net::MemoryHub;

    fn addr(port: u16) -> NetworkAddress {
        NetworkAddress::new("127.0.0.1", port)
    }

    fn n(id: u64) -> NodeId {
        NodeId::new(id)
    }

    fn test_node(hub: &MemoryHub, id: u64, port: u16) -> Arc<OverlayNode> {
        let endpoint = hub.attach(n(id), addr(port));
        let config = NodeConfig {
            node_id: Some(id),
            listen_port: port,
            max_peers: 4,
            ..NodeConfig::default()
        };
        OverlayNode::new(config, endpoint)
    }

    #[test]
    fn add_node_registers_and_adopts_peer() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        hub.attach(n(2), addr(8002));

        node.add_node(n(2), addr(8002)).unwrap();

        assert!(node.topology_node_exists(n(2)));
        assert!(node.local().has_peer(n(2)));
        assert_eq!(node.node_state(n(2)), NodeState::Active);
        assert_eq!(node.active_node_count(), 1);
    }

    #[test]
    fn add_node_validates_inputs() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);

        assert!(matches!(
            node.add_node(n(0), addr(8002)),
            Err(OverlayError::InvalidArgument(_))
        ));
        assert!(matches!(
            node.add_node(n(1), addr(8002)),
            Err(OverlayError::InvalidArgument(_))
        ));
        assert!(matches!(
            node.add_node(n(2), NetworkAddress::new("", 0)),
            Err(OverlayError::InvalidArgument(_))
        ));

        node.add_node(n(2), addr(8002)).unwrap();
        assert!(matches!(
            node.add_node(n(2), addr(8002)),
            Err(OverlayError::AlreadyPresent(_))
        ));
    }

    #[test]
    fn roster_overflow_still_registers_in_topology() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);

        for id in 2..=7u64 {
            node.add_node(n(id), addr(8000 + id as u16)).unwrap();
        }
        // max_peers = 4: the roster capped out, the topology did not
        // (it also counts the local node itself).
        assert_eq!(node.local().peer_count(), 4);
        assert_eq!(node.known_node_count(), 7);
    }

    #[test]
    fn graceful_and_forced_removal() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        node.add_node(n(2), addr(8002)).unwrap();
        node.add_node(n(3), addr(8003)).unwrap();

        node.remove_node_graceful(n(2)).unwrap();
        assert!(!node.topology_node_exists(n(2)));
        assert!(!node.local().has_peer(n(2)));
        assert!(matches!(
            node.remove_node_graceful(n(2)),
            Err(OverlayError::NotFound(_))
        ));

        node.remove_node_forced(n(3)).unwrap();
        assert!(!node.topology_node_exists(n(3)));
    }

    #[test]
    fn ensure_connectivity_fills_roster() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        node.add_node(n(2), addr(8002)).unwrap();

        // Drop the peer but keep it registered, then let maintenance
        // re-adopt it.
        node.local().remove_peer(n(2)).unwrap();
        assert_eq!(node.local().peer_count(), 0);

        node.ensure_connectivity();
        assert!(node.local().has_peer(n(2)));
    }

    #[test]
    fn shortest_path_routing_uses_next_hop() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        let _b = hub.attach(n(2), addr(8002));
        let _c = hub.attach(n(3), addr(8003));

        node.add_node(n(2), addr(8002)).unwrap();
        node.add_node(n(3), addr(8003)).unwrap();
        node.add_link(n(2), n(3)).unwrap();
        // Adoption linked us to both; drop the direct link to 3 so the
        // only route left goes through 2.
        node.remove_link(n(1), n(3));

        assert_eq!(node.hop_count(n(3)), Some(2));
        assert_eq!(node.next_hop(n(3)), Some(n(2)));
        assert!(node.is_reachable(n(3)));

        let message = Message::data(n(1), n(3), b"x".to_vec(), Timestamp::now());
        assert!(node
            .route_message(&message, RoutingStrategy::ShortestPath)
            .unwrap());
        // The frame went to the next hop, node 2.
        assert_eq!(hub.drain_inbox(n(2)).len(), 1);
    }

    #[test]
    fn unreachable_target_is_a_typed_error() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        let message = Message::data(n(1), n(9), b"x".to_vec(), Timestamp::now());
        assert!(matches!(
            node.route_message(&message, RoutingStrategy::ShortestPath),
            Err(OverlayError::Unreachable(_))
        ));
        assert!(!node.is_reachable(n(9)));
        assert_eq!(node.hop_count(n(9)), None);
    }

    #[test]
    fn flood_suppresses_duplicates() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);
        hub.attach(n(2), addr(8002));
        hub.attach(n(3), addr(8003));
        node.add_node(n(2), addr(8002)).unwrap();
        node.add_node(n(3), addr(8003)).unwrap();

        let message = Message::data(n(9), n(0), b"gossip".to_vec(), Timestamp::from_millis(42));
        assert!(node.route_message(&message, RoutingStrategy::Flood).unwrap());
        let delivered = hub.drain_inbox(n(2)).len() + hub.drain_inbox(n(3)).len();
        assert_eq!(delivered, 2);

        // Same fingerprint again: dropped, nothing more delivered.
        assert!(!node.route_message(&message, RoutingStrategy::Flood).unwrap());
        assert_eq!(hub.drain_inbox(n(2)).len() + hub.drain_inbox(n(3)).len(), 0);
        assert_eq!(node.route_stats().flood_suppressed(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_join_background_loops() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, 1, 8001);

        node.start().await;
        assert!(node.local().is_active());

        node.stop().await;
        assert!(!node.local().is_active());
        assert!(locked(&node.tasks).is_empty());

        // A second stop finds no loops and no receivers; both are fine.
        node.stop().await;
    }
}
