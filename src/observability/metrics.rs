//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define filter metrics (body modes, overflows, rule hits, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `filter_requests_total` (counter): requests by method, status
//! - `filter_request_duration_seconds` (histogram): latency distribution
//! - `filter_responses_total` (counter): responses by body mode
//!   (recorded, passthrough, bypass)
//! - `filter_buffer_overflows_total` (counter): recordings abandoned at the ceiling
//! - `filter_rules_applied_total` (counter): rule executions
//! - `filter_errors_total` (counter): errors by kind
//!
//! # Design Decisions
//! - Uses the `metrics` facade; nothing is recorded until `init_metrics` runs
//! - Labels are static strings to keep cardinality bounded

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    metrics::counter!(
        "filter_requests_total",
        "method" => method.clone(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "filter_request_duration_seconds",
        "method" => method,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

/// Counts a response by how its body travelled through the filter.
pub fn record_body_mode(mode: &'static str) {
    metrics::counter!("filter_responses_total", "mode" => mode).increment(1);
}

pub fn record_overflow() {
    metrics::counter!("filter_buffer_overflows_total").increment(1);
}

pub fn record_rules_applied(count: usize) {
    if count > 0 {
        metrics::counter!("filter_rules_applied_total").increment(count as u64);
    }
}

pub fn record_error(kind: &'static str) {
    metrics::counter!("filter_errors_total", "kind" => kind).increment(1);
}
