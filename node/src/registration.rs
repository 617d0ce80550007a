//! Admission control for join requests.
//!
//! Every join flows through [`AdmissionPolicy::evaluate`]: identity and
//! address validation, a replay window on the request timestamp, the
//! optional operator-supplied authorization predicate, and a roster
//! capacity check. A failed check yields a typed rejection carrying the
//! human-readable reason sent back to the joiner.

use std::sync::Mutex;

use lattice_types::{params, NetworkAddress, NodeId, OverlayError, Timestamp};

/// Operator-supplied predicate consulted before admitting a node.
pub type AuthPredicate = Box<dyn Fn(NodeId, &NetworkAddress) -> bool + Send + Sync>;

/// A decoded join request, as seen by admission.
#[derive(Clone, Debug)]
pub struct AdmissionRequest {
    pub node_id: NodeId,
    pub address: NetworkAddress,
    pub timestamp: Timestamp,
}

/// Validates join requests against local identity, address sanity, replay
/// freshness, authorization, and roster capacity.
pub struct AdmissionPolicy {
    local_id: NodeId,
    local_address: NetworkAddress,
    authorizer: Mutex<Option<AuthPredicate>>,
}

impl AdmissionPolicy {
    pub fn new(local_id: NodeId, local_address: NetworkAddress) -> Self {
        Self {
            local_id,
            local_address,
            authorizer: Mutex::new(None),
        }
    }

    /// Install (or replace) the authorization predicate. `None` means
    /// every validated node is authorized.
    pub fn set_authorizer(&self, predicate: Option<AuthPredicate>) {
        *self.authorizer.lock().expect("lock poisoned") = predicate;
    }

    /// Run the full admission check. `roster_len`/`max_peers` describe the
    /// current peer roster; `now` is the local clock.
    pub fn evaluate(
        &self,
        request: &AdmissionRequest,
        roster_len: usize,
        max_peers: usize,
        now: Timestamp,
    ) -> Result<(), OverlayError> {
        self.validate_node_id(request.node_id)?;
        self.validate_address(&request.address)?;

        // Replay guard: the request timestamp must sit within the window
        // either side of our clock.
        let window_ms = params::JOIN_REPLAY_WINDOW_SECS * 1000;
        if request.timestamp.abs_diff_millis(now) > window_ms {
            return Err(OverlayError::Rejected(format!(
                "stale join request from node {}",
                request.node_id
            )));
        }

        let authorizer = self.authorizer.lock().expect("lock poisoned");
        if let Some(predicate) = authorizer.as_ref() {
            if !predicate(request.node_id, &request.address) {
                return Err(OverlayError::Rejected(format!(
                    "node {} not authorized",
                    request.node_id
                )));
            }
        }
        drop(authorizer);

        if roster_len >= max_peers {
            return Err(OverlayError::CapacityExhausted);
        }

        Ok(())
    }

    fn validate_node_id(&self, id: NodeId) -> Result<(), OverlayError> {
        if id.is_broadcast() {
            return Err(OverlayError::Rejected("node id 0 is reserved".to_string()));
        }
        if id == self.local_id {
            return Err(OverlayError::Rejected(format!(
                "node {id} is our own identity"
            )));
        }
        Ok(())
    }

    fn validate_address(&self, address: &NetworkAddress) -> Result<(), OverlayError> {
        if address.host.is_empty() {
            return Err(OverlayError::Rejected("empty host".to_string()));
        }
        if address.port < 1024 {
            return Err(OverlayError::Rejected(format!(
                "port {} outside 1024..=65535",
                address.port
            )));
        }
        if *address == self.local_address {
            return Err(OverlayError::Rejected(format!(
                "address {address} is our own"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: u64 = 1_700_000_000_000;

    fn policy() -> AdmissionPolicy {
        AdmissionPolicy::new(NodeId::new(1), NetworkAddress::new("10.0.0.1", 8888))
    }

    fn request(id: u64, host: &str, port: u16, ts_ms: u64) -> AdmissionRequest {
        AdmissionRequest {
            node_id: NodeId::new(id),
            address: NetworkAddress::new(host, port),
            timestamp: Timestamp::from_millis(ts_ms),
        }
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(NOW_MS)
    }

    #[test]
    fn valid_request_is_admitted() {
        let policy = policy();
        let req = request(2, "10.0.0.2", 8888, NOW_MS);
        assert!(policy.evaluate(&req, 0, 10, now()).is_ok());
    }

    #[test]
    fn zero_and_self_ids_are_rejected() {
        let policy = policy();
        assert!(matches!(
            policy.evaluate(&request(0, "10.0.0.2", 8888, NOW_MS), 0, 10, now()),
            Err(OverlayError::Rejected(_))
        ));
        assert!(matches!(
            policy.evaluate(&request(1, "10.0.0.2", 8888, NOW_MS), 0, 10, now()),
            Err(OverlayError::Rejected(_))
        ));
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let policy = policy();
        // Empty host.
        assert!(policy
            .evaluate(&request(2, "", 8888, NOW_MS), 0, 10, now())
            .is_err());
        // Privileged port.
        assert!(policy
            .evaluate(&request(2, "10.0.0.2", 1023, NOW_MS), 0, 10, now())
            .is_err());
        // Our own address.
        assert!(policy
            .evaluate(&request(2, "10.0.0.1", 8888, NOW_MS), 0, 10, now())
            .is_err());
        // Port 1024 itself is fine.
        assert!(policy
            .evaluate(&request(2, "10.0.0.2", 1024, NOW_MS), 0, 10, now())
            .is_ok());
    }

    #[test]
    fn replay_window_cuts_both_directions() {
        let policy = policy();
        let window = 60_000;

        let stale = request(2, "10.0.0.2", 8888, NOW_MS - window - 1);
        assert!(policy.evaluate(&stale, 0, 10, now()).is_err());

        let future = request(2, "10.0.0.2", 8888, NOW_MS + window + 1);
        assert!(policy.evaluate(&future, 0, 10, now()).is_err());

        let edge = request(2, "10.0.0.2", 8888, NOW_MS - window);
        assert!(policy.evaluate(&edge, 0, 10, now()).is_ok());
    }

    #[test]
    fn authorizer_vetoes_admission() {
        let policy = policy();
        policy.set_authorizer(Some(Box::new(|id, _| id != NodeId::new(66))));

        assert!(policy
            .evaluate(&request(2, "10.0.0.2", 8888, NOW_MS), 0, 10, now())
            .is_ok());
        assert!(matches!(
            policy.evaluate(&request(66, "10.0.0.2", 8888, NOW_MS), 0, 10, now()),
            Err(OverlayError::Rejected(_))
        ));

        policy.set_authorizer(None);
        assert!(policy
            .evaluate(&request(66, "10.0.0.2", 8888, NOW_MS), 0, 10, now())
            .is_ok());
    }

    #[test]
    fn full_roster_exhausts_capacity() {
        let policy = policy();
        let req = request(2, "10.0.0.2", 8888, NOW_MS);
        assert_eq!(
            policy.evaluate(&req, 10, 10, now()),
            Err(OverlayError::CapacityExhausted)
        );
    }
}
