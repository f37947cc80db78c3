//! Metrics collection and export for pointsync.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use pointsync_core::HubStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "pointsync_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "pointsync_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "pointsync_connections_rejected_total";
    pub const HANDSHAKE_FAILURES: &str = "pointsync_handshake_failures_total";
    pub const POINTS: &str = "pointsync_points";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused before upgrade, by reason"
    );
    metrics::describe_counter!(
        names::HANDSHAKE_FAILURES,
        "WebSocket upgrades that failed to complete"
    );
    metrics::describe_gauge!(names::POINTS, "Current number of points in the store");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// Record a connection refused before upgrade.
pub fn record_rejection(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record a failed WebSocket upgrade.
pub fn record_handshake_failure() {
    counter!(names::HANDSHAKE_FAILURES).increment(1);
}

/// Publish the hub's current sizes.
pub fn record_hub_stats(stats: HubStats) {
    gauge!(names::CONNECTIONS_ACTIVE).set(stats.connections as f64);
    gauge!(names::POINTS).set(stats.points as f64);
}
