//! The shared error enum for overlay operations.
//!
//! Operations return typed results; nothing aborts the process. Background
//! loops log failures and continue.

use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// Malformed address, zero/self node id, oversize payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Adding a node or peer that already exists.
    #[error("node {0} already present")]
    AlreadyPresent(NodeId),

    /// Removing or addressing an unknown node, message, or transfer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Peer roster full on admission.
    #[error("peer roster at capacity")]
    CapacityExhausted,

    /// The router cannot find a path to the target.
    #[error("no route to node {0}")]
    Unreachable(NodeId),

    /// The underlying transport adapter reported a send or connect failure.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Admission denied by validation or the authorization predicate.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Reliable delivery exhausted its retries, or a transfer went inactive
    /// past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subject() {
        let err = OverlayError::AlreadyPresent(NodeId::new(7));
        assert_eq!(err.to_string(), "node 7 already present");

        let err = OverlayError::Unreachable(NodeId::new(3));
        assert_eq!(err.to_string(), "no route to node 3");
    }
}
