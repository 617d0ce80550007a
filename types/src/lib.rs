//! Fundamental types for the lattice overlay network.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: node identifiers, network addresses, millisecond timestamps,
//! the common error enum, and protocol constants.

pub mod address;
pub mod error;
pub mod id;
pub mod params;
pub mod time;

pub use address::NetworkAddress;
pub use error::OverlayError;
pub use id::NodeId;
pub use time::Timestamp;
