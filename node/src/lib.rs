//! The lattice overlay node — wires the overlay subsystems together.
//!
//! An [`OverlayNode`] owns the topology graph, membership records, routing
//! state, reliable-delivery table, and chunked-transfer bookkeeping, talks
//! to the wire through a [`lattice_net::Transport`] adapter, and runs the
//! periodic maintenance loops (heartbeats, routing refresh, integrity
//! sweep, cleanup) as background tasks.

pub mod config;
pub mod discovery;
pub mod events;
pub mod exchange;
pub mod handler;
pub mod logging;
pub mod membership;
pub mod metrics;
pub mod node;
pub mod registration;
pub mod reliable;
pub mod roster;

pub use config::NodeConfig;
pub use events::{EventBus, OverlayEvent};
pub use logging::{init_logging, LogFormat};
pub use membership::{MemberRecord, MembershipTable, NodeState};
pub use metrics::OverlayMetrics;
pub use node::OverlayNode;
