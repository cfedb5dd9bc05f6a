//! Metrics collection and exposition.
//!
//! # Metrics
//! - `harenet_requests_total` (counter): dispatched requests by method, status
//! - `harenet_request_duration_seconds` (histogram): dispatch latency
//! - `harenet_file_responses_total` (counter): file responses by outcome
//! - `harenet_websocket_sessions_active` (gauge): open WebSocket sessions

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one dispatched request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("harenet_requests_total", &labels).increment(1);
    metrics::histogram!("harenet_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

/// Record the outcome of a file response (`full`, `single_range`, ...).
pub fn record_file_response(kind: &'static str) {
    metrics::counter!("harenet_file_responses_total", "kind" => kind).increment(1);
}

pub fn websocket_opened() {
    metrics::gauge!("harenet_websocket_sessions_active").increment(1.0);
}

pub fn websocket_closed() {
    metrics::gauge!("harenet_websocket_sessions_active").decrement(1.0);
}
