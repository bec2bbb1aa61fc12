//! Scuttle Wire Protocol - Binary encoding
//!
//! This crate implements the byte layout of everything that crosses the
//! medium:
//! - Events, frontiers, feed id sets and news batches
//! - Replication protocol messages (Ids, Frontier, News)
//! - Transport packets carried inside broadcast waves
//!
//! All integers are little-endian, collections are length-prefixed and
//! maps are written in key order, so equal values encode to equal bytes.

pub mod codec;
pub mod message;
pub mod packet;

pub use codec::*;
pub use message::*;
pub use packet::*;
