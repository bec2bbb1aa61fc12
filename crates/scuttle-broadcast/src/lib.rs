//! Scuttle Broadcast - The radio layer under replication
//!
//! Relays share one lossy broadcast medium. This crate provides:
//! - Waves and ARQ requests, the two kinds of transmission
//! - Topology and per-relay neighbor tables
//! - The medium: distance latency, jitter, loss, collisions, bandwidth
//! - Relays: flooding with causal per-source delivery and pull-based
//!   retransmission, hosting one replication participant each
//! - Addressed delivery on top of the flood: direct messages for one relay,
//!   topic messages for subscribers

pub mod wave;
pub mod topology;
pub mod medium;
pub mod relay;

pub use wave::*;
pub use topology::*;
pub use medium::*;
pub use relay::*;
