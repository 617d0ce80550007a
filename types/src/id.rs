//! Node identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque 64-bit node identifier.
///
/// The value `0` is reserved: as a message receiver it means "broadcast",
/// everywhere else it means "unknown" and is rejected on input.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The reserved broadcast/unknown sentinel.
    pub const BROADCAST: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the reserved `0` sentinel.
    pub fn is_broadcast(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
