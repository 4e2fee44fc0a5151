//! Tracing initialization, grounded on the teacher's `clusterd` binary
//! (`tracing_subscriber` with an env-filter-driven fmt layer rather than
//! the teacher's full OpenTelemetry pipeline, which this daemon has no use
//! for).

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Call once, at the top of `main`.
pub fn init() {
    let filter = EnvFilter::try_from_env("FLEETD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
