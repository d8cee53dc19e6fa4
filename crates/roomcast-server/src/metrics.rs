//! Metrics collection and export for Roomcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use roomcast_core::HubStats;
use roomcast_transport::AdapterSummary;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
    pub const ADMISSION_REJECTED: &str = "roomcast_admission_rejected_total";
    pub const FRAMES_TOTAL: &str = "roomcast_frames_total";
    pub const FANOUT_TOTAL: &str = "roomcast_fanout_requests_total";
    pub const HUB_CONNECTIONS: &str = "roomcast_hub_connections";
    pub const HUB_USERS: &str = "roomcast_hub_users";
    pub const HUB_ROOMS: &str = "roomcast_hub_rooms";
    pub const HUB_SLOW_CONSUMERS: &str = "roomcast_hub_slow_consumers_evicted";
    pub const HUB_SESSIONS_REPLACED: &str = "roomcast_hub_sessions_replaced";
    pub const HUB_FRAMES_REJECTED: &str = "roomcast_hub_frames_rejected";
    pub const PRESENCE_PRUNED: &str = "roomcast_presence_pruned_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of websocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of websocket connections"
    );
    metrics::describe_counter!(
        names::ADMISSION_REJECTED,
        "Connection requests rejected before upgrade"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Websocket frames by direction");
    metrics::describe_counter!(names::FANOUT_TOTAL, "Fan-out requests made over HTTP");
    metrics::describe_gauge!(names::HUB_CONNECTIONS, "Connections in the routing table");
    metrics::describe_gauge!(names::HUB_USERS, "Users with a live session");
    metrics::describe_gauge!(names::HUB_ROOMS, "Rooms with at least one connection");
    metrics::describe_gauge!(
        names::HUB_SLOW_CONSUMERS,
        "Connections dropped for a full outbound queue"
    );
    metrics::describe_gauge!(
        names::HUB_SESSIONS_REPLACED,
        "Sessions evicted by a newer session of the same user"
    );
    metrics::describe_gauge!(
        names::HUB_FRAMES_REJECTED,
        "Client frames dropped by the hub"
    );
    metrics::describe_counter!(names::PRESENCE_PRUNED, "Expired online flags removed");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a connection request rejected by admission.
pub fn record_admission_rejected(reason: &'static str) {
    counter!(names::ADMISSION_REJECTED, "reason" => reason).increment(1);
}

/// Record the frame counts of a finished connection.
pub fn record_frames(summary: AdapterSummary) {
    counter!(names::FRAMES_TOTAL, "direction" => "inbound").increment(summary.frames_in);
    counter!(names::FRAMES_TOTAL, "direction" => "outbound").increment(summary.frames_out);
}

/// Record a fan-out request.
pub fn record_fanout(kind: &'static str) {
    counter!(names::FANOUT_TOTAL, "kind" => kind).increment(1);
}

/// Record pruned presence entries.
pub fn record_presence_pruned(count: usize) {
    counter!(names::PRESENCE_PRUNED).increment(count as u64);
}

/// Publish hub counters as gauges.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::HUB_CONNECTIONS).set(stats.connections as f64);
    gauge!(names::HUB_USERS).set(stats.users as f64);
    gauge!(names::HUB_ROOMS).set(stats.rooms as f64);
    gauge!(names::HUB_SLOW_CONSUMERS).set(stats.slow_consumers_evicted as f64);
    gauge!(names::HUB_SESSIONS_REPLACED).set(stats.sessions_replaced as f64);
    gauge!(names::HUB_FRAMES_REJECTED).set(stats.frames_rejected as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
