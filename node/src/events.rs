//! Events emitted by the overlay node for subscribers.
//!
//! One fan-out bus per node. Listeners run inline on the emitting thread
//! with every core lock already released — emitters build events from
//! snapshots, drop their guards, then emit. Keep handlers fast.

use std::sync::{Arc, Mutex};

use lattice_types::{NetworkAddress, NodeId};

/// Everything observable about a node's life from the outside.
#[derive(Clone, Debug)]
pub enum OverlayEvent {
    /// A node was admitted into the overlay.
    NodeAdded { id: NodeId, address: NetworkAddress },
    /// A node left gracefully and was removed.
    NodeRemoved { id: NodeId },
    /// A node was force-removed after failure detection.
    NodeFailed { id: NodeId },
    /// Topology repair restored connectivity.
    NetworkRepaired,
    /// Discovery surfaced a candidate peer.
    PeerDiscovered { id: NodeId, address: NetworkAddress },
    /// A bootstrap candidate could not be reached.
    DiscoveryFailed { address: NetworkAddress },
    /// An inbound join request was admitted.
    JoinAccepted { id: NodeId, address: NetworkAddress },
    /// An inbound join request was turned away.
    JoinRejected { id: NodeId, reason: String },
    /// A reliable message was acknowledged.
    MessageDelivered { message_id: u64, peer: NodeId },
    /// A reliable message exhausted its retries or could not be sent.
    MessageFailed { message_id: u64, peer: NodeId },
    /// An application-level message arrived for the local sink.
    DataMessage { from: NodeId, payload: Vec<u8> },
    /// A chunked transfer finished reassembly.
    DataReceived {
        from: NodeId,
        data: Vec<u8>,
        data_type: String,
    },
    /// A transfer moved forward on either side.
    TransferProgress {
        transfer_id: u64,
        transferred: usize,
        total: usize,
    },
    /// A transfer reached a terminal state on the sending side.
    TransferComplete { transfer_id: u64, success: bool },
}

type Listener = Arc<dyn Fn(&OverlayEvent) + Send + Sync>;

/// Synchronous fan-out bus.
///
/// The listener list is snapshotted before invocation, so a listener may
/// re-enter the node (and emit further events) without deadlocking.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&OverlayEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("lock poisoned")
            .push(Arc::new(listener));
    }

    pub fn emit(&self, event: &OverlayEvent) {
        let listeners: Vec<Listener> = self.listeners.lock().expect("lock poisoned").clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("lock poisoned").len()
    }
}
