//! Protocol dispatch: one entry point per inbound message.
//!
//! Transport adapters call [`OverlayNode::handle_message`] for every
//! decoded frame, possibly from several ingress workers at once. Frames
//! in transit to another node are forwarded instead of consumed.

use lattice_messages::{payload, Message, MessageKind};
use lattice_net::RoutingStrategy;

use crate::events::OverlayEvent;
use crate::node::{locked, OverlayNode};
use crate::registration::AdmissionRequest;

impl OverlayNode {
    /// Dispatch one inbound message.
    pub fn handle_message(&self, message: Message) {
        tracing::trace!(
            kind = ?message.kind,
            sender = %message.sender,
            receiver = %message.receiver,
            "inbound message"
        );

        if self.is_transit(&message) {
            self.route_stats.record_forwarded();
            self.metrics.messages_forwarded.inc();
            if let Err(e) = self.route_message(&message, RoutingStrategy::ShortestPath) {
                tracing::warn!(receiver = %message.receiver, error = %e, "transit frame dropped");
            }
            return;
        }

        match message.kind {
            MessageKind::JoinRequest => self.on_join_request(&message),
            MessageKind::JoinResponse => self.on_join_response(&message),
            MessageKind::LeaveNotification => self.on_leave_notification(&message),
            MessageKind::Heartbeat => self.on_heartbeat(&message),
            MessageKind::Data => self.events.emit(&OverlayEvent::DataMessage {
                from: message.sender,
                payload: message.payload,
            }),
            MessageKind::TopologyUpdate => self.on_topology_update(&message),
            MessageKind::PeerDiscovery => self.on_peer_discovery(&message),
            MessageKind::Route => self.events.emit(&OverlayEvent::DataMessage {
                from: message.sender,
                payload: message.payload,
            }),
            MessageKind::Ack => self.on_ack(&message),
            MessageKind::DataChunk => self.on_data_chunk(&message),
            MessageKind::TransferRequest => self.on_transfer_request(&message),
            MessageKind::TransferResponse => self.on_transfer_response(&message),
        }
    }

    /// A frame is in transit when it names another node as receiver and is
    /// of a kind that relays. Control messages are point-to-point hops.
    fn is_transit(&self, message: &Message) -> bool {
        if message.receiver.is_broadcast() || message.receiver == self.id() {
            return false;
        }
        matches!(
            message.kind,
            MessageKind::Data
                | MessageKind::Route
                | MessageKind::Ack
                | MessageKind::DataChunk
                | MessageKind::TransferRequest
                | MessageKind::TransferResponse
        )
    }

    // ── Join handshake ──────────────────────────────────────────────────

    fn on_join_request(&self, message: &Message) {
        let address = match payload::decode_join_request(&message.payload) {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad join request payload");
                return;
            }
        };

        let now = self.now();
        let request = AdmissionRequest {
            node_id: message.sender,
            address: address.clone(),
            timestamp: message.timestamp,
        };
        let verdict = self.admission.evaluate(
            &request,
            self.local.peer_count(),
            self.config.max_peers,
            now,
        );

        match verdict {
            Ok(()) => {
                if let Err(e) = self.add_node(message.sender, address.clone()) {
                    tracing::debug!(node = %message.sender, error = %e, "joiner already known");
                }
                let suggestions = {
                    locked(&self.topology).discover_peers(
                        message.sender,
                        self.id(),
                        self.config.max_peers,
                    )
                };
                let response =
                    Message::join_response(self.id(), message.sender, true, &suggestions, now);
                if !self.transport.send(message.sender, &response) {
                    tracing::warn!(node = %message.sender, "could not deliver join response");
                }
                tracing::info!(node = %message.sender, %address, "join accepted");
                self.events.emit(&OverlayEvent::JoinAccepted {
                    id: message.sender,
                    address,
                });
            }
            Err(reason) => {
                let response = Message::join_response(self.id(), message.sender, false, &[], now);
                let _ = self.transport.send(message.sender, &response);
                tracing::info!(node = %message.sender, %reason, "join rejected");
                self.events.emit(&OverlayEvent::JoinRejected {
                    id: message.sender,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn on_join_response(&self, message: &Message) {
        let (accepted, suggested) = match payload::decode_join_response(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad join response payload");
                return;
            }
        };
        // The acceptance bit is informational; suggestions are processed
        // either way.
        tracing::info!(
            from = %message.sender,
            accepted,
            suggested = suggested.len(),
            "join response"
        );

        // This response identifies the bootstrap we just connected to.
        let bootstrap = locked(&self.pending_bootstrap).take();
        if let Some(address) = bootstrap {
            if let Err(e) = self.add_node(message.sender, address) {
                tracing::debug!(node = %message.sender, error = %e, "bootstrap already known");
            }
        }

        for id in suggested {
            if id == self.id() || self.local.has_peer(id) {
                continue;
            }
            match self.topology_address_of(id) {
                Some(address) => {
                    self.adopt_peer(id, &address);
                }
                None => {
                    tracing::debug!(node = %id, "suggested peer has no known address yet");
                }
            }
        }
    }

    // ── Membership traffic ──────────────────────────────────────────────

    fn on_leave_notification(&self, message: &Message) {
        let departed = message.sender;
        tracing::info!(node = %departed, "peer announced departure");
        // Departed-node updates are rebroadcast to everyone except the
        // node that told us.
        if let Err(e) = self.remove_node_common(departed, true, departed) {
            tracing::debug!(node = %departed, error = %e, "departing node was not known");
        }
    }

    fn on_heartbeat(&self, message: &Message) {
        let now = self.now();
        {
            locked(&self.membership).touch(message.sender, now);
        }
        self.local.update_last_seen(now);

        // An empty payload marks a probe; the reply echoes the probe's
        // timestamp and is itself never answered.
        if message.payload.is_empty() {
            let reply = Message::heartbeat_reply(self.id(), message.sender, message.timestamp, now);
            if !self.transport.send(message.sender, &reply) {
                tracing::debug!(peer = %message.sender, "heartbeat reply hand-off failed");
            }
        }
    }

    fn on_topology_update(&self, message: &Message) {
        let updated = match payload::decode_node_list(&message.payload) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad topology update payload");
                return;
            }
        };

        for id in updated {
            // Ids we no longer find in the topology have left the overlay:
            // drop them from the roster too.
            let exists = { locked(&self.topology).node_exists(id) };
            if !exists && self.local.remove_peer(id).is_ok() {
                tracing::info!(node = %id, "dropping departed peer after topology update");
                self.transport.disconnect(id);
                locked(&self.membership).remove(id);
            }
        }

        let repaired = {
            let mut topology = locked(&self.topology);
            topology.validate();
            if topology.is_connected() {
                None
            } else {
                Some(topology.repair())
            }
        };
        if repaired == Some(true) {
            self.events.emit(&OverlayEvent::NetworkRepaired);
        }
        self.refresh_gauges();
    }

    fn on_peer_discovery(&self, message: &Message) {
        let requested = payload::decode_peer_discovery(&message.payload)
            .unwrap_or(self.config.max_peers as i32);
        let max_peers = usize::try_from(requested).unwrap_or(0);

        let suggestions =
            { locked(&self.topology).discover_peers(message.sender, self.id(), max_peers) };
        let response = Message::join_response(
            self.id(),
            message.sender,
            true,
            &suggestions,
            self.now(),
        );
        if !self.transport.send(message.sender, &response) {
            tracing::debug!(peer = %message.sender, "peer discovery reply hand-off failed");
        }
    }

    // ── Reliable & transfer traffic ─────────────────────────────────────

    fn on_ack(&self, message: &Message) {
        match payload::decode_ack(&message.payload) {
            Ok(message_id) => {
                if !self.acknowledge_message(message_id, message.sender) {
                    tracing::debug!(message_id, "ack for unknown message");
                }
            }
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad ack payload");
            }
        }
    }

    fn on_data_chunk(&self, message: &Message) {
        match payload::decode_chunk(&message.payload) {
            Ok(chunk) => self.ingest_chunk(message.sender, chunk),
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad data chunk payload");
            }
        }
    }

    fn on_transfer_request(&self, message: &Message) {
        let offer = match payload::decode_transfer_request(&message.payload) {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad transfer request");
                return;
            }
        };

        {
            locked(&self.transfers).expect_incoming(
                offer.transfer_id,
                message.sender,
                self.id(),
                offer.data_type.clone(),
                offer.total_size as usize,
                self.now(),
            );
        }
        tracing::debug!(
            transfer_id = offer.transfer_id,
            from = %message.sender,
            total = offer.total_size,
            data_type = %offer.data_type,
            "transfer announced"
        );

        let response = Message::transfer_response(
            self.id(),
            message.sender,
            offer.transfer_id,
            true,
            self.now(),
        );
        if let Err(e) = self.route_message(&response, RoutingStrategy::ShortestPath) {
            tracing::debug!(peer = %message.sender, error = %e, "transfer response undeliverable");
        }
    }

    fn on_transfer_response(&self, message: &Message) {
        match payload::decode_transfer_response(&message.payload) {
            Ok((transfer_id, accepted)) => {
                tracing::debug!(transfer_id, accepted, from = %message.sender, "transfer response");
            }
            Err(e) => {
                tracing::warn!(sender = %message.sender, error = %e, "bad transfer response");
            }
        }
    }
}
