//! Overlay networking layer for lattice.
//!
//! Holds the in-memory topology graph with its connectivity invariants,
//! the routing table and strategies, flood deduplication, and the
//! transport seam the node core talks through.

pub mod dedup;
pub mod memory;
pub mod routing;
pub mod topology;
pub mod transport;

pub use dedup::SeenMessages;
pub use memory::{MemoryEndpoint, MemoryHub};
pub use routing::{RouteStats, RoutingStrategy, RoutingTable};
pub use topology::TopologyGraph;
pub use transport::Transport;
