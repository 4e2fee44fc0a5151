//! Prometheus metrics (spec §6 ambient additions), grounded on the
//! teacher's `materialized::http::SERVER_METADATA_RAW` gauge-vec pattern.

use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder};

use fleet_build_info::BuildInfo;

static SERVER_METADATA_RAW: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "fleetd_server_metadata_seconds",
        "server metadata, value is uptime",
        &["build_time", "build_version", "build_sha"]
    )
    .expect("can register fleetd_server_metadata_seconds")
});

/// Registers the server-identity gauge against `build_info` and returns the
/// handle a background task should periodically set to the process uptime.
pub fn register_server_metadata(build_info: &BuildInfo) -> Gauge {
    SERVER_METADATA_RAW.with_label_values(&[build_info.time, build_info.version, build_info.sha])
}

/// Renders the default Prometheus registry as text, for the `/metrics`
/// handler.
pub fn render() -> anyhow::Result<String> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
