//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sysadmin_requests_total` (counter): requests by method and status
//! - `sysadmin_request_duration_seconds` (histogram): latency distribution
//! - `sysadmin_db_queries_total` (counter): round trips by operation and outcome
//!
//! # Design Decisions
//! - Labels stay low-cardinality: no paths, no SQL
//! - The Prometheus listener is optional and runs on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record one completed HTTP request.
pub fn record_request(method: &str, status: u16, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("sysadmin_requests_total", &labels).increment(1);
    histogram!("sysadmin_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

/// Record one database round trip.
pub fn record_query(operation: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("sysadmin_db_queries_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
