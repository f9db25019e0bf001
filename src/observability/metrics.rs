//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transport_requests_total` (counter): terminal request outcomes by state
//! - `transport_request_duration_seconds` (histogram): enqueue-to-terminal latency
//! - `transport_connections_opened_total` (counter)
//! - `transport_connections_closed_total` (counter): by close reason
//! - `transport_retries_total` (counter): resends after transport faults
//! - `transport_buffer_pool_hits_total` / `transport_buffer_pool_misses_total` (counter)
//! - `transport_buffer_pool_bytes` (gauge): bytes held by the pool after maintenance

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    if let Err(e) = builder.install() {
        tracing::error!(error = %e, "Failed to install Prometheus exporter");
    } else {
        tracing::info!(address = %addr, "Metrics exporter listening");
    }
}

/// Record a request reaching its terminal state.
pub fn record_request(outcome: &'static str, start: Instant) {
    counter!("transport_requests_total", "outcome" => outcome).increment(1);
    histogram!("transport_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_connection_opened() {
    counter!("transport_connections_opened_total").increment(1);
}

pub fn record_connection_closed(reason: &'static str) {
    counter!("transport_connections_closed_total", "reason" => reason).increment(1);
}

pub fn record_retry() {
    counter!("transport_retries_total").increment(1);
}

pub fn record_buffer_lookup(hit: bool) {
    if hit {
        counter!("transport_buffer_pool_hits_total").increment(1);
    } else {
        counter!("transport_buffer_pool_misses_total").increment(1);
    }
}

pub fn record_buffer_pool_bytes(bytes: usize) {
    gauge!("transport_buffer_pool_bytes").set(bytes as f64);
}
