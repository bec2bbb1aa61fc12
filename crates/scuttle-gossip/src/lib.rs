//! Scuttle Gossip - Pairwise replication sessions
//!
//! A session reconciles two stores in at most three steps:
//! 1. Id lists, only under open replication, so both sides learn every feed
//! 2. Frontiers, the last index each side holds per feed
//! 3. News, the events the other side is missing
//!
//! The `Participant` owns the identity, the store and the interest policy
//! of one peer, runs its sessions and queues newly replicated content for
//! the application.

pub mod session;
pub mod participant;

pub use session::*;
pub use participant::*;
