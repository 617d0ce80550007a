//! Network message types for lattice node-to-node communication.
//!
//! Every frame on the wire is a [`Message`]: a fixed 32-byte header
//! (see [`wire`]) followed by an opaque payload whose interpretation
//! depends on the [`MessageKind`] tag. Control-message payload codecs
//! live in [`payload`].

pub mod payload;
pub mod wire;

pub use payload::Chunk;
pub use wire::{decode_message, encode_message, WireError, HEADER_LEN, MAX_PAYLOAD_LEN};

use lattice_types::{NetworkAddress, NodeId, Timestamp};

/// All message kinds in the protocol. The discriminants are wire-stable:
/// they appear verbatim as the one-byte type tag in the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// A node asks to join via a peer, carrying its advertised address.
    JoinRequest = 1,
    /// Admission verdict plus a suggested-peer list.
    JoinResponse = 2,
    /// Graceful departure announcement.
    LeaveNotification = 3,
    /// Liveness probe; the reply doubles as the acknowledgment.
    Heartbeat = 4,
    /// Application payload delivered to the local sink.
    Data = 5,
    /// Node-id list whose entries changed (joined or left).
    TopologyUpdate = 6,
    /// Request for peer suggestions, bounded by a max count.
    PeerDiscovery = 7,
    /// Application payload routed across multiple hops.
    Route = 8,
    /// Acknowledgment of a reliable message by its 64-bit id.
    Ack = 9,
    /// One segment of a chunked transfer.
    DataChunk = 10,
    /// Pre-announcement of a chunked transfer (id, size, data type).
    TransferRequest = 11,
    /// Accept/decline answer to a transfer request.
    TransferResponse = 12,
}

impl MessageKind {
    /// Decode a wire tag. Returns `None` for unassigned values.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::JoinRequest,
            2 => Self::JoinResponse,
            3 => Self::LeaveNotification,
            4 => Self::Heartbeat,
            5 => Self::Data,
            6 => Self::TopologyUpdate,
            7 => Self::PeerDiscovery,
            8 => Self::Route,
            9 => Self::Ack,
            10 => Self::DataChunk,
            11 => Self::TransferRequest,
            12 => Self::TransferResponse,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A protocol message: type tag, sender, receiver, sender wall-clock
/// timestamp, and opaque payload bytes.
///
/// A receiver of `NodeId::BROADCAST` (zero) means the message is for every
/// peer. The timestamp is never trusted for ordering, only for staleness
/// and replay checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        sender: NodeId,
        receiver: NodeId,
        timestamp: Timestamp,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            sender,
            receiver,
            timestamp,
            payload,
        }
    }

    /// Whether this message targets every peer rather than a single node.
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_broadcast()
    }

    // ── Constructors for the control vocabulary ─────────────────────────

    pub fn join_request(
        sender: NodeId,
        receiver: NodeId,
        advertised: &NetworkAddress,
        now: Timestamp,
    ) -> Self {
        Self::new(
            MessageKind::JoinRequest,
            sender,
            receiver,
            now,
            payload::encode_join_request(advertised),
        )
    }

    pub fn join_response(
        sender: NodeId,
        receiver: NodeId,
        accepted: bool,
        peers: &[NodeId],
        now: Timestamp,
    ) -> Self {
        Self::new(
            MessageKind::JoinResponse,
            sender,
            receiver,
            now,
            payload::encode_join_response(accepted, peers),
        )
    }

    pub fn leave_notification(sender: NodeId, now: Timestamp) -> Self {
        Self::new(
            MessageKind::LeaveNotification,
            sender,
            NodeId::BROADCAST,
            now,
            Vec::new(),
        )
    }

    /// A liveness probe. The empty payload marks it as a probe; replies
    /// echo the probe's timestamp in their payload (see [`heartbeat_reply`]).
    ///
    /// [`heartbeat_reply`]: Message::heartbeat_reply
    pub fn heartbeat(sender: NodeId, receiver: NodeId, now: Timestamp) -> Self {
        Self::new(MessageKind::Heartbeat, sender, receiver, now, Vec::new())
    }

    /// The acknowledging reply to a heartbeat probe. Carries the probe's
    /// timestamp so the receiver does not answer it with another reply.
    pub fn heartbeat_reply(
        sender: NodeId,
        receiver: NodeId,
        probe_timestamp: Timestamp,
        now: Timestamp,
    ) -> Self {
        Self::new(
            MessageKind::Heartbeat,
            sender,
            receiver,
            now,
            probe_timestamp.as_millis().to_le_bytes().to_vec(),
        )
    }

    pub fn data(sender: NodeId, receiver: NodeId, bytes: Vec<u8>, now: Timestamp) -> Self {
        Self::new(MessageKind::Data, sender, receiver, now, bytes)
    }

    pub fn topology_update(sender: NodeId, updated: &[NodeId], now: Timestamp) -> Self {
        Self::new(
            MessageKind::TopologyUpdate,
            sender,
            NodeId::BROADCAST,
            now,
            payload::encode_node_list(updated),
        )
    }

    pub fn peer_discovery(sender: NodeId, receiver: NodeId, max_peers: i32, now: Timestamp) -> Self {
        Self::new(
            MessageKind::PeerDiscovery,
            sender,
            receiver,
            now,
            payload::encode_peer_discovery(max_peers),
        )
    }

    pub fn ack(sender: NodeId, receiver: NodeId, message_id: u64, now: Timestamp) -> Self {
        Self::new(
            MessageKind::Ack,
            sender,
            receiver,
            now,
            payload::encode_ack(message_id),
        )
    }

    pub fn data_chunk(sender: NodeId, receiver: NodeId, chunk: &Chunk, now: Timestamp) -> Self {
        Self::new(
            MessageKind::DataChunk,
            sender,
            receiver,
            now,
            payload::encode_chunk(chunk),
        )
    }

    pub fn transfer_request(
        sender: NodeId,
        receiver: NodeId,
        offer: &payload::TransferOffer,
        now: Timestamp,
    ) -> Self {
        Self::new(
            MessageKind::TransferRequest,
            sender,
            receiver,
            now,
            payload::encode_transfer_request(offer),
        )
    }

    pub fn transfer_response(
        sender: NodeId,
        receiver: NodeId,
        transfer_id: u64,
        accepted: bool,
        now: Timestamp,
    ) -> Self {
        Self::new(
            MessageKind::TransferResponse,
            sender,
            receiver,
            now,
            payload::encode_transfer_response(transfer_id, accepted),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips() {
        for tag in 1u8..=12 {
            let kind = MessageKind::from_tag(tag).expect("assigned tag");
            assert_eq!(kind.tag(), tag);
        }
    }

    #[test]
    fn unassigned_tags_are_rejected() {
        assert_eq!(MessageKind::from_tag(0), None);
        assert_eq!(MessageKind::from_tag(13), None);
        assert_eq!(MessageKind::from_tag(255), None);
    }

    #[test]
    fn leave_and_topology_update_are_broadcasts() {
        let now = Timestamp::from_millis(1);
        assert!(Message::leave_notification(NodeId::new(4), now).is_broadcast());
        assert!(Message::topology_update(NodeId::new(4), &[NodeId::new(9)], now).is_broadcast());
        assert!(!Message::heartbeat(NodeId::new(4), NodeId::new(5), now).is_broadcast());
    }

    #[test]
    fn heartbeat_probe_and_reply_are_distinguishable() {
        let now = Timestamp::from_millis(500);
        let probe = Message::heartbeat(NodeId::new(1), NodeId::new(2), now);
        assert!(probe.payload.is_empty());

        let reply =
            Message::heartbeat_reply(NodeId::new(2), NodeId::new(1), probe.timestamp, now);
        assert_eq!(reply.payload, 500u64.to_le_bytes().to_vec());
    }
}
