//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (connections, delivered frames, failures)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `frame_server_connections_accepted_total` (counter)
//! - `frame_server_active_connections` (gauge)
//! - `frame_server_frames_delivered_total` (counter): by `kind`
//! - `frame_server_listener_failures_total` (counter): by `kind`
//! - `frame_server_tls_handshakes_total` (counter): by `outcome`
//! - `frame_server_tls_rejected_total` (counter): credentials missing at handshake time
//! - `frame_server_malformed_streams_total` (counter)
//! - `frame_server_idle_timeouts_total` (counter)
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are static strings only

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::frame::FrameKind;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_connection_accepted() {
    ::metrics::counter!("frame_server_connections_accepted_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    ::metrics::gauge!("frame_server_active_connections").set(count as f64);
}

pub fn record_frame_delivered(kind: FrameKind) {
    ::metrics::counter!("frame_server_frames_delivered_total", "kind" => kind.as_str())
        .increment(1);
}

pub fn record_listener_failure(kind: FrameKind) {
    ::metrics::counter!("frame_server_listener_failures_total", "kind" => kind.as_str())
        .increment(1);
}

pub fn record_tls_handshake(established: bool) {
    let outcome = if established { "established" } else { "failed" };
    ::metrics::counter!("frame_server_tls_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn record_tls_rejected() {
    ::metrics::counter!("frame_server_tls_rejected_total").increment(1);
}

pub fn record_malformed_stream() {
    ::metrics::counter!("frame_server_malformed_streams_total").increment(1);
}

pub fn record_idle_timeout() {
    ::metrics::counter!("frame_server_idle_timeouts_total").increment(1);
}
