//! Integration tests exercising whole nodes over the in-memory fabric:
//! join handshake → membership → routing → reliable delivery → chunked
//! transfer. These wire together components that are normally only
//! connected inside `node.rs`, verifying the system end-to-end — not just
//! in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lattice_messages::{payload, Message, MessageKind};
use lattice_net::{MemoryEndpoint, MemoryHub, RoutingStrategy, Transport};
use lattice_node::exchange::{split_chunks, TransferStatus};
use lattice_node::{NodeConfig, NodeState, OverlayEvent, OverlayNode};
use lattice_types::{NetworkAddress, NodeId, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn addr(port: u16) -> NetworkAddress {
    NetworkAddress::new("127.0.0.1", port)
}

fn n(id: u64) -> NodeId {
    NodeId::new(id)
}

/// Attach a node to the hub and wire inbound frames into its handler.
fn spawn_node(hub: &MemoryHub, id: u64, port: u16) -> (Arc<OverlayNode>, Arc<MemoryEndpoint>) {
    let endpoint = hub.attach(n(id), addr(port));
    let config = NodeConfig {
        node_id: Some(id),
        listen_port: port,
        max_peers: 8,
        ..NodeConfig::default()
    };
    let node = OverlayNode::new(config, Arc::clone(&endpoint) as Arc<dyn Transport>);

    let sink = Arc::clone(&node);
    hub.set_handler(n(id), move |message| sink.handle_message(message));
    (node, endpoint)
}

/// A bootstrap node plus a joiner that completed the handshake against it.
fn joined_pair(
    hub: &MemoryHub,
) -> (
    (Arc<OverlayNode>, Arc<MemoryEndpoint>),
    (Arc<OverlayNode>, Arc<MemoryEndpoint>),
) {
    let a = spawn_node(hub, 1, 8001);
    let b = spawn_node(hub, 2, 8002);
    assert!(b.0.discover_network(&[addr(8001)]));
    ((a.0, a.1), (b.0, b.1))
}

// ---------------------------------------------------------------------------
// 1. Join handshake
// ---------------------------------------------------------------------------

#[test]
fn join_handshake_admits_both_sides() {
    let hub = MemoryHub::new();
    let ((a, a_ep), (b, _b_ep)) = joined_pair(&hub);

    // The bootstrap admitted the joiner.
    assert!(a.local().has_peer(n(2)));
    assert!(a.topology_node_exists(n(2)));
    assert_eq!(a.node_state(n(2)), NodeState::Active);

    // The joiner learned the bootstrap's identity from the response.
    assert!(b.local().has_peer(n(1)));
    assert!(b.topology_node_exists(n(1)));

    // The wire carried an accepted join response.
    let responses = a_ep.sent_of_kind(MessageKind::JoinResponse);
    assert_eq!(responses.len(), 1);
    let (accepted, _) = payload::decode_join_response(&responses[0].payload).unwrap();
    assert!(accepted);
}

#[test]
fn join_is_rejected_when_roster_is_full() {
    let hub = MemoryHub::new();
    let bootstrap_ep = hub.attach(n(1), addr(8001));
    let config = NodeConfig {
        node_id: Some(1),
        listen_port: 8001,
        max_peers: 1,
        ..NodeConfig::default()
    };
    let bootstrap = OverlayNode::new(config, Arc::clone(&bootstrap_ep) as Arc<dyn Transport>);
    let sink = Arc::clone(&bootstrap);
    hub.set_handler(n(1), move |message| sink.handle_message(message));

    let rejections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rejections);
    bootstrap.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::JoinRejected { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let (first, _) = spawn_node(&hub, 2, 8002);
    let (second, _) = spawn_node(&hub, 3, 8003);
    assert!(first.discover_network(&[addr(8001)]));
    assert!(second.discover_network(&[addr(8001)]));

    assert!(bootstrap.local().has_peer(n(2)));
    assert!(!bootstrap.local().has_peer(n(3)));
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
}

#[test]
fn discovery_failure_fires_per_candidate() {
    let hub = MemoryHub::new();
    let (node, _) = spawn_node(&hub, 1, 8001);

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    node.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::DiscoveryFailed { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(!node.discover_network(&[addr(9001), addr(9002)]));
    assert_eq!(failures.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// 2. Membership churn
// ---------------------------------------------------------------------------

#[test]
fn leave_notification_cleans_up_the_departed_peer() {
    let hub = MemoryHub::new();
    let ((a, _), (b, _)) = joined_pair(&hub);

    b.leave_network();

    assert!(!a.local().has_peer(n(2)));
    assert!(!a.topology_node_exists(n(2)));
    assert_eq!(a.node_state(n(2)), NodeState::Unknown);
    assert!(b.local().peer_ids().is_empty());
}

#[test]
fn failure_sweep_force_removes_after_three_strikes() {
    let hub = MemoryHub::new();
    let (a, _) = spawn_node(&hub, 1, 8001);
    hub.attach(n(2), addr(8002));
    a.add_node(n(2), addr(8002)).unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    a.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::NodeFailed { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    // Timeout zero makes the peer overdue on every sweep; the third
    // strike triggers the forced removal.
    a.detect_failed_nodes(0);
    assert!(a.topology_node_exists(n(2)));
    a.detect_failed_nodes(0);
    assert!(a.topology_node_exists(n(2)));
    a.detect_failed_nodes(0);

    assert!(!a.topology_node_exists(n(2)));
    assert!(!a.local().has_peer(n(2)));
    assert_eq!(a.node_state(n(2)), NodeState::Unknown);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[test]
fn topology_update_prunes_unknown_roster_entries() {
    let hub = MemoryHub::new();
    let (a, _) = spawn_node(&hub, 1, 8001);

    // Roster entry with no topology backing (desync injected on purpose).
    a.local().add_peer(n(5), addr(8005)).unwrap();
    assert!(a.local().has_peer(n(5)));

    let update = Message::topology_update(n(9), &[n(5)], Timestamp::now());
    a.handle_message(update);

    assert!(!a.local().has_peer(n(5)));
}

#[test]
fn integrity_sweep_repairs_a_partition() {
    let hub = MemoryHub::new();
    let (a, _) = spawn_node(&hub, 1, 8001);
    hub.attach(n(2), addr(8002));
    hub.attach(n(3), addr(8003));
    a.add_node(n(2), addr(8002)).unwrap();
    a.add_node(n(3), addr(8003)).unwrap();

    let repaired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&repaired);
    a.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::NetworkRepaired) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    a.remove_link(n(1), n(2));
    a.remove_link(n(1), n(3));
    assert!(!a.is_topology_connected());

    assert!(a.maintain_network_integrity());
    assert!(a.is_topology_connected());
    assert_eq!(repaired.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// 3. Heartbeats
// ---------------------------------------------------------------------------

#[test]
fn heartbeat_probe_draws_exactly_one_reply() {
    let hub = MemoryHub::new();
    let ((_a, a_ep), (_b, b_ep)) = joined_pair(&hub);

    let probe = Message::heartbeat(n(1), n(2), Timestamp::now());
    assert!(a_ep.send(n(2), &probe));

    // B answered the probe; A recognised the echo and stayed quiet.
    assert_eq!(b_ep.sent_of_kind(MessageKind::Heartbeat).len(), 1);
    assert_eq!(a_ep.sent_of_kind(MessageKind::Heartbeat).len(), 1);
}

// ---------------------------------------------------------------------------
// 4. Flood routing
// ---------------------------------------------------------------------------

#[test]
fn flooded_message_is_forwarded_at_most_once() {
    let hub = MemoryHub::new();
    let (a, a_ep) = spawn_node(&hub, 1, 8001);
    hub.attach(n(2), addr(8002));
    hub.attach(n(3), addr(8003));
    a.add_node(n(2), addr(8002)).unwrap();
    a.add_node(n(3), addr(8003)).unwrap();
    let baseline = a_ep.sent_count();

    let gossip = Message::data(
        n(9),
        NodeId::BROADCAST,
        b"gossip".to_vec(),
        Timestamp::from_millis(777),
    );

    assert!(a
        .route_message(&gossip, RoutingStrategy::Flood)
        .unwrap());
    let after_first = a_ep.sent_count();
    assert_eq!(after_first - baseline, 2);

    // Identical fingerprint: silently dropped, nothing else on the wire.
    assert!(!a
        .route_message(&gossip, RoutingStrategy::Flood)
        .unwrap());
    assert_eq!(a_ep.sent_count(), after_first);
}

// ---------------------------------------------------------------------------
// 5. Reliable delivery
// ---------------------------------------------------------------------------

#[test]
fn reliable_ack_fires_delivered_once_and_rate_hits_100() {
    let hub = MemoryHub::new();
    let ((a, _), (_b, b_ep)) = joined_pair(&hub);

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    a.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::MessageDelivered { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let message = Message::data(n(1), n(2), b"important".to_vec(), Timestamp::now());
    let message_id = a.send_reliable(n(2), message).unwrap();

    // The receiving application echoes the id back as an ack.
    let ack = Message::ack(n(2), n(1), message_id, Timestamp::now());
    assert!(b_ep.send(n(1), &ack));

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert!((a.delivery_rate() - 100.0).abs() < f64::EPSILON);

    // A duplicate ack succeeds without re-firing the event.
    assert!(b_ep.send(n(1), &ack));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn reliable_message_fails_after_exhausting_retries() {
    let hub = MemoryHub::new();
    let (a, a_ep) = spawn_node(&hub, 1, 8001);
    // The wire eats everything: sends succeed, nothing arrives.
    a_ep.set_drop_sends(true);

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failed);
    a.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::MessageFailed { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let message = Message::data(n(1), n(2), b"lost".to_vec(), Timestamp::now());
    a.send_reliable(n(2), message).unwrap();

    // Three passes retry, the fourth gives up.
    for _ in 0..4 {
        a.retry_pending(0, 3);
    }

    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(a.delivery_rate(), 0.0);

    // No further retries happen once the record is gone.
    let sends_so_far = a_ep.sent_count();
    a.retry_pending(0, 3);
    assert_eq!(a_ep.sent_count(), sends_so_far);
}

#[test]
fn reliable_send_failure_is_immediate() {
    let hub = MemoryHub::new();
    let (a, a_ep) = spawn_node(&hub, 1, 8001);
    a_ep.set_fail_sends(true);

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failed);
    a.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::MessageFailed { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let message = Message::data(n(1), n(2), b"x".to_vec(), Timestamp::now());
    assert!(a.send_reliable(n(2), message).is_err());
    assert_eq!(failed.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// 6. Chunked transfer
// ---------------------------------------------------------------------------

#[test]
fn ten_kilobyte_transfer_crosses_the_wire_in_three_chunks() {
    let hub = MemoryHub::new();
    let ((a, a_ep), (b, _)) = joined_pair(&hub);

    let received: Arc<Mutex<Option<(NodeId, Vec<u8>, String)>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&received);
    b.events().subscribe(move |event| {
        if let OverlayEvent::DataReceived {
            from,
            data,
            data_type,
        } = event
        {
            *slot.lock().unwrap() = Some((*from, data.clone(), data_type.clone()));
        }
    });

    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    let transfer_id = a.send_data(n(2), &data, "blob").unwrap();

    // Exactly three chunks, sized 4096/4096/1808, only the last flagged.
    let frames = a_ep.sent_of_kind(MessageKind::DataChunk);
    assert_eq!(frames.len(), 3);
    let chunks: Vec<_> = frames
        .iter()
        .map(|frame| payload::decode_chunk(&frame.payload).unwrap())
        .collect();
    assert_eq!(chunks[0].data.len(), 4096);
    assert_eq!(chunks[1].data.len(), 4096);
    assert_eq!(chunks[2].data.len(), 1808);
    assert!(chunks.iter().all(|chunk| chunk.total_chunks == 3));
    assert_eq!(chunks.iter().filter(|chunk| chunk.is_last).count(), 1);
    assert!(chunks[2].is_last);

    // The receiver rebuilt the exact payload and saw the announced type.
    let (from, bytes, data_type) = received.lock().unwrap().take().expect("data received");
    assert_eq!(from, n(1));
    assert_eq!(bytes, data);
    assert_eq!(data_type, "blob");
    assert_eq!(b.received_data(transfer_id), Some(data));

    assert_eq!(
        a.transfer_record(transfer_id).unwrap().status,
        TransferStatus::Completed
    );
    assert_eq!(
        b.transfer_record(transfer_id).unwrap().status,
        TransferStatus::Completed
    );
}

#[test]
fn chunks_arriving_out_of_order_still_reassemble() {
    let hub = MemoryHub::new();
    let (b, _) = spawn_node(&hub, 2, 8002);

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&received);
    b.events().subscribe(move |event| {
        if let OverlayEvent::DataReceived { data, .. } = event {
            *slot.lock().unwrap() = Some(data.clone());
        }
    });

    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let chunks = split_chunks(&data, 4096, 99);
    assert_eq!(chunks.len(), 3);

    // Deliver 2, 0, 1 — completion must wait for the full set.
    b.handle_message(Message::data_chunk(n(7), n(2), &chunks[2], Timestamp::now()));
    b.handle_message(Message::data_chunk(n(7), n(2), &chunks[0], Timestamp::now()));
    assert!(received.lock().unwrap().is_none());

    b.handle_message(Message::data_chunk(n(7), n(2), &chunks[1], Timestamp::now()));
    assert_eq!(received.lock().unwrap().take().unwrap(), data);
}

#[test]
fn transfer_to_unreachable_target_fails() {
    let hub = MemoryHub::new();
    let (a, _) = spawn_node(&hub, 1, 8001);

    let completions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completions);
    a.events().subscribe(move |event| {
        if let OverlayEvent::TransferComplete { success: false, .. } = event {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(a.send_data(n(9), &[1, 2, 3], "blob").is_err());
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// 7. Multi-hop forwarding
// ---------------------------------------------------------------------------

#[test]
fn data_crosses_an_intermediate_node() {
    let hub = MemoryHub::new();
    // Chain: 1 - 2 - 3. Node 2 relays between the ends.
    let (a, _) = spawn_node(&hub, 1, 8001);
    let (relay, _) = spawn_node(&hub, 2, 8002);
    let (c, _) = spawn_node(&hub, 3, 8003);

    for node in [&a, &relay, &c] {
        for (id, port) in [(1u64, 8001u16), (2, 8002), (3, 8003)] {
            if node.id() != n(id) {
                let _ = node.add_node(n(id), addr(port));
            }
        }
    }
    // Restrict the links to a chain on every node's map.
    for node in [&a, &relay, &c] {
        node.remove_link(n(1), n(3));
        node.add_link(n(1), n(2)).unwrap();
        node.add_link(n(2), n(3)).unwrap();
    }

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    c.events().subscribe(move |event| {
        if matches!(event, OverlayEvent::DataMessage { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let message = Message::data(n(1), n(3), b"across".to_vec(), Timestamp::now());
    assert!(a
        .route_message(&message, RoutingStrategy::ShortestPath)
        .unwrap());

    // Node 2 forwarded it on; node 3's sink saw it once.
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert!(relay.route_stats().forwarded() >= 1);
}
