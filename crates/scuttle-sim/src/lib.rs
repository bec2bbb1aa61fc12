//! Scuttle Sim - Discrete-time simulation harness
//!
//! This crate provides:
//! - The `Simulation` world: clock, medium, placement and relays
//! - Scenario construction with relay layouts
//! - Medium observers and run metrics
//! - Canned scenarios: convergence, single session, lossy-link recovery,
//!   transitive follow and block
//! - Tracing setup for runs and tests

pub mod world;
pub mod scenario;
pub mod scenarios;
pub mod observer;
pub mod metrics;
pub mod telemetry;

pub use world::*;
pub use scenario::*;
pub use scenarios::*;
pub use observer::*;
pub use metrics::*;
pub use telemetry::*;
