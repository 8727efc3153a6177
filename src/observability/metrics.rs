//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_requests_total` (counter): finalized requests by method, status
//! - `bridge_request_duration_seconds` (histogram): time from registration to finalization
//! - `bridge_outcomes_total` (counter): success / failure / cancelled
//! - `bridge_in_flight` (gauge): registry size
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Serve Prometheus metrics on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "bridge_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("bridge_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_outcome(outcome: &'static str) {
    metrics::counter!("bridge_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_in_flight(count: usize) {
    metrics::gauge!("bridge_in_flight").set(count as f64);
}
