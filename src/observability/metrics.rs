//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wormhole_requests_total` (counter): tunneled requests by method, status
//! - `wormhole_request_duration_seconds` (histogram): gateway round trip
//! - `wormhole_correlator_timeouts_total` (counter): flows that hit the response window
//! - `wormhole_frames_dropped_total` (counter): malformed or unroutable frames
//! - `wormhole_deliveries_total` (counter): client responses by strategy
//! - `wormhole_blob_cache_hits_total` (counter): responses served from an existing blob
//! - `wormhole_hub_connections` (gauge): sockets attached to the hub
//! - `wormhole_reconnects_total` (counter): relay session reconnect attempts
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "wormhole_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("wormhole_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

pub fn record_correlator_timeout() {
    metrics::counter!("wormhole_correlator_timeouts_total").increment(1);
}

pub fn record_frame_dropped(reason: &'static str) {
    metrics::counter!("wormhole_frames_dropped_total", "reason" => reason).increment(1);
}

pub fn record_delivery(strategy: &'static str) {
    metrics::counter!("wormhole_deliveries_total", "strategy" => strategy).increment(1);
}

pub fn record_blob_cache_hit() {
    metrics::counter!("wormhole_blob_cache_hits_total").increment(1);
}

pub fn record_hub_connections(count: usize) {
    metrics::gauge!("wormhole_hub_connections").set(count as f64);
}

pub fn record_reconnect(role: &'static str) {
    metrics::counter!("wormhole_reconnects_total", "role" => role).increment(1);
}
