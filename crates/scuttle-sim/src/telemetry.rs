//! Tracing setup for simulation runs and tests

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "warn,scuttle_sim=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}
