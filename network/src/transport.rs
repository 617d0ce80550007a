//! The transport seam between the overlay core and the wire.
//!
//! The core never touches sockets. It drives a [`Transport`] adapter,
//! which may block briefly or report failure; inbound frames flow the
//! other way, from the adapter's read loops into the node's message
//! handler. Concrete adapters own the byte-level framing.

use lattice_messages::Message;
use lattice_types::{NetworkAddress, NodeId};

/// What the overlay core requires from a transport adapter.
///
/// All methods are infallible-by-signature: an adapter reports trouble by
/// returning `false` and the core maps that to `TransportFailure` where a
/// typed error is needed. Implementations must be safe to call from the
/// ingress workers, the background loops, and the foreground driver at
/// once.
pub trait Transport: Send + Sync {
    /// Open (or confirm) a session to the given address.
    fn connect(&self, address: &NetworkAddress) -> bool;

    /// Tear down the session to a peer.
    fn disconnect(&self, peer: NodeId) -> bool;

    /// Deliver one message to a connected peer.
    fn send(&self, peer: NodeId, message: &Message) -> bool;

    /// Deliver one message to every currently connected peer except
    /// `exclude` (pass [`NodeId::BROADCAST`] to exclude nobody).
    fn broadcast(&self, message: &Message, exclude: NodeId);
}
