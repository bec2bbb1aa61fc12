//! Scuttle Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every Scuttle layer:
//! - Identifiers (FeedId, RelayId, TopicId) and the discrete clock (Tick)
//! - Log events, their content and the frontier/news reconciliation types
//! - The error taxonomy
//! - Simulation configuration and the injected simulation context

pub mod id;
pub mod time;
pub mod event;
pub mod frontier;
pub mod config;
pub mod context;
pub mod error;

pub use id::*;
pub use time::*;
pub use event::*;
pub use frontier::*;
pub use config::*;
pub use context::*;
pub use error::*;
