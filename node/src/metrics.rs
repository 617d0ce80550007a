//! Prometheus metrics for the overlay node.
//!
//! The [`OverlayMetrics`] struct owns a dedicated [`Registry`] so multiple
//! nodes can coexist in one process (tests, local simulations) without
//! colliding on metric names.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

/// Central collection of node-level metrics.
pub struct OverlayMetrics {
    /// The registry that owns every metric below.
    pub registry: Registry,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Nodes currently registered in the topology.
    pub known_nodes: IntGauge,
    /// Peers currently in the local roster.
    pub connected_peers: IntGauge,
    /// Reliable messages awaiting acknowledgment.
    pub pending_reliable: IntGauge,
    /// Transfers currently in progress on either side.
    pub active_transfers: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    /// Messages handed to the router.
    pub messages_routed: IntCounter,
    /// Messages forwarded on behalf of other nodes.
    pub messages_forwarded: IntCounter,
    /// Flooded messages dropped as duplicates.
    pub flood_suppressed: IntCounter,
    /// Heartbeats sent to peers.
    pub heartbeats_sent: IntCounter,
    /// Reliable messages successfully handed to the transport.
    pub reliable_sent: IntCounter,
    /// Reliable messages acknowledged.
    pub reliable_acknowledged: IntCounter,
    /// Reliable messages that exhausted their retries.
    pub reliable_failed: IntCounter,
    /// Transfers completed on the sending side.
    pub transfers_completed: IntCounter,
    /// Transfers failed on the sending side.
    pub transfers_failed: IntCounter,
}

impl OverlayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let known_nodes = register_int_gauge_with_registry!(
            Opts::new("lattice_known_nodes", "Nodes registered in the topology"),
            registry
        )
        .expect("failed to register known_nodes gauge");

        let connected_peers = register_int_gauge_with_registry!(
            Opts::new("lattice_connected_peers", "Peers in the local roster"),
            registry
        )
        .expect("failed to register connected_peers gauge");

        let pending_reliable = register_int_gauge_with_registry!(
            Opts::new(
                "lattice_pending_reliable",
                "Reliable messages awaiting acknowledgment"
            ),
            registry
        )
        .expect("failed to register pending_reliable gauge");

        let active_transfers = register_int_gauge_with_registry!(
            Opts::new("lattice_active_transfers", "Transfers in progress"),
            registry
        )
        .expect("failed to register active_transfers gauge");

        let messages_routed = register_int_counter_with_registry!(
            Opts::new("lattice_messages_routed_total", "Messages handed to the router"),
            registry
        )
        .expect("failed to register messages_routed counter");

        let messages_forwarded = register_int_counter_with_registry!(
            Opts::new(
                "lattice_messages_forwarded_total",
                "Messages forwarded for other nodes"
            ),
            registry
        )
        .expect("failed to register messages_forwarded counter");

        let flood_suppressed = register_int_counter_with_registry!(
            Opts::new(
                "lattice_flood_suppressed_total",
                "Flooded messages dropped as duplicates"
            ),
            registry
        )
        .expect("failed to register flood_suppressed counter");

        let heartbeats_sent = register_int_counter_with_registry!(
            Opts::new("lattice_heartbeats_sent_total", "Heartbeats sent to peers"),
            registry
        )
        .expect("failed to register heartbeats_sent counter");

        let reliable_sent = register_int_counter_with_registry!(
            Opts::new(
                "lattice_reliable_sent_total",
                "Reliable messages handed to the transport"
            ),
            registry
        )
        .expect("failed to register reliable_sent counter");

        let reliable_acknowledged = register_int_counter_with_registry!(
            Opts::new(
                "lattice_reliable_acknowledged_total",
                "Reliable messages acknowledged"
            ),
            registry
        )
        .expect("failed to register reliable_acknowledged counter");

        let reliable_failed = register_int_counter_with_registry!(
            Opts::new(
                "lattice_reliable_failed_total",
                "Reliable messages that exhausted retries"
            ),
            registry
        )
        .expect("failed to register reliable_failed counter");

        let transfers_completed = register_int_counter_with_registry!(
            Opts::new(
                "lattice_transfers_completed_total",
                "Transfers completed on the sending side"
            ),
            registry
        )
        .expect("failed to register transfers_completed counter");

        let transfers_failed = register_int_counter_with_registry!(
            Opts::new(
                "lattice_transfers_failed_total",
                "Transfers failed on the sending side"
            ),
            registry
        )
        .expect("failed to register transfers_failed counter");

        Self {
            registry,
            known_nodes,
            connected_peers,
            pending_reliable,
            active_transfers,
            messages_routed,
            messages_forwarded,
            flood_suppressed,
            heartbeats_sent,
            reliable_sent,
            reliable_acknowledged,
            reliable_failed,
            transfers_completed,
            transfers_failed,
        }
    }
}

impl Default for OverlayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
