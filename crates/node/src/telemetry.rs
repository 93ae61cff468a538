//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise structured logging for a replica process.
///
/// Honors `RUST_LOG`; defaults to `info` with engine internals at `debug`.
/// Safe to call more than once (later calls are no-ops), so tests and
/// embedding processes can both use it.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,arbor_consensus=debug"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
