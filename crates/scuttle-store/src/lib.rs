//! Scuttle Store - Feeds and their reconciliation
//!
//! - `Log`: one append-only, hash-chained, signed feed
//! - `Store`: the feeds a participant replicates, with frontier based
//!   delta computation and idempotent batch updates
//! - `InterestPolicy`: which feeds the store should hold (open or
//!   transitive follow/block)

pub mod feed;
pub mod store;
pub mod interest;

pub use feed::*;
pub use store::*;
pub use interest::*;
