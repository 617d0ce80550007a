//! In-process transport fabric.
//!
//! [`MemoryHub`] wires any number of endpoints together by address, with
//! no sockets involved: sends are delivered synchronously to the target's
//! registered handler (or parked in its inbox until one is set). Endpoints
//! record their outbound traffic and can be switched into failing or
//! silently-discarding modes, which is how the reliable-delivery and
//! retry paths get exercised in tests and local simulations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lattice_messages::{Message, MessageKind};
use lattice_types::{NetworkAddress, NodeId};

use crate::transport::Transport;

type Handler = Arc<dyn Fn(Message) + Send + Sync>;

#[derive(Default)]
struct HubState {
    addresses: HashMap<NetworkAddress, NodeId>,
    handlers: HashMap<NodeId, Handler>,
    inboxes: HashMap<NodeId, Vec<Message>>,
}

/// The shared fabric endpoints attach to.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node at an address and get its transport endpoint.
    pub fn attach(&self, id: NodeId, address: NetworkAddress) -> Arc<MemoryEndpoint> {
        let mut state = self.state.lock().expect("hub lock poisoned");
        state.addresses.insert(address, id);
        state.inboxes.entry(id).or_default();
        drop(state);

        Arc::new(MemoryEndpoint {
            local: id,
            hub: Arc::clone(&self.state),
            connected: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            drop_sends: AtomicBool::new(false),
        })
    }

    /// Register the inbound-message handler for an attached node. Any
    /// messages parked in its inbox are replayed into the handler first.
    pub fn set_handler(&self, id: NodeId, handler: impl Fn(Message) + Send + Sync + 'static) {
        let handler: Handler = Arc::new(handler);
        let parked = {
            let mut state = self.state.lock().expect("hub lock poisoned");
            state.handlers.insert(id, Arc::clone(&handler));
            state
                .inboxes
                .get_mut(&id)
                .map(std::mem::take)
                .unwrap_or_default()
        };
        for message in parked {
            handler(message);
        }
    }

    /// Messages delivered to a node before it registered a handler.
    pub fn drain_inbox(&self, id: NodeId) -> Vec<Message> {
        let mut state = self.state.lock().expect("hub lock poisoned");
        state
            .inboxes
            .get_mut(&id)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

/// One node's view of the fabric. Implements [`Transport`].
pub struct MemoryEndpoint {
    local: NodeId,
    hub: Arc<Mutex<HubState>>,
    connected: Mutex<HashSet<NodeId>>,
    sent: Mutex<Vec<(NodeId, Message)>>,
    fail_sends: AtomicBool,
    drop_sends: AtomicBool,
}

impl MemoryEndpoint {
    /// Make every subsequent `send` report failure.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `send` report success without delivering —
    /// the wire that eats messages.
    pub fn set_drop_sends(&self, drop: bool) {
        self.drop_sends.store(drop, Ordering::SeqCst);
    }

    /// Every `(target, message)` pair handed to this endpoint, in order.
    pub fn sent_messages(&self) -> Vec<(NodeId, Message)> {
        self.sent.lock().expect("endpoint lock poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("endpoint lock poisoned").len()
    }

    /// Outbound messages of one kind, in send order.
    pub fn sent_of_kind(&self, kind: MessageKind) -> Vec<Message> {
        self.sent
            .lock()
            .expect("endpoint lock poisoned")
            .iter()
            .filter(|(_, message)| message.kind == kind)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn is_connected_to(&self, peer: NodeId) -> bool {
        self.connected
            .lock()
            .expect("endpoint lock poisoned")
            .contains(&peer)
    }

    fn deliver(&self, peer: NodeId, message: &Message) -> bool {
        // Resolve the handler under the hub lock, invoke it outside, so a
        // handler that immediately sends again cannot deadlock the fabric.
        let resolved = {
            let mut state = self.hub.lock().expect("hub lock poisoned");
            if let Some(handler) = state.handlers.get(&peer) {
                Some(Arc::clone(handler))
            } else if let Some(inbox) = state.inboxes.get_mut(&peer) {
                inbox.push(message.clone());
                None
            } else {
                return false;
            }
        };

        if let Some(handler) = resolved {
            handler(message.clone());
        }
        true
    }
}

impl Transport for MemoryEndpoint {
    fn connect(&self, address: &NetworkAddress) -> bool {
        let peer = {
            let state = self.hub.lock().expect("hub lock poisoned");
            state.addresses.get(address).copied()
        };
        match peer {
            Some(id) if id != self.local => {
                self.connected
                    .lock()
                    .expect("endpoint lock poisoned")
                    .insert(id);
                true
            }
            _ => false,
        }
    }

    fn disconnect(&self, peer: NodeId) -> bool {
        self.connected
            .lock()
            .expect("endpoint lock poisoned")
            .remove(&peer)
    }

    fn send(&self, peer: NodeId, message: &Message) -> bool {
        self.sent
            .lock()
            .expect("endpoint lock poisoned")
            .push((peer, message.clone()));

        if self.fail_sends.load(Ordering::SeqCst) {
            return false;
        }
        if self.drop_sends.load(Ordering::SeqCst) {
            return true;
        }
        self.deliver(peer, message)
    }

    fn broadcast(&self, message: &Message, exclude: NodeId) {
        let targets: Vec<NodeId> = {
            let connected = self.connected.lock().expect("endpoint lock poisoned");
            connected.iter().copied().filter(|&id| id != exclude).collect()
        };
        for peer in targets {
            self.send(peer, message);
        }
    }
}
