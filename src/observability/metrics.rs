//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_quota_checks_total` (counter): quota checks by class and outcome
//! - `gateway_rate_limited_total` (counter): rejected requests by class
//! - `gateway_retries_total` (counter): retries scheduled by the retry executor
//! - `gateway_cache_events_total` (counter): cache hits, misses, evictions
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("route", route.to_string()),
    ];
    counter!("gateway_requests_total", labels.clone()).increment(1);
    histogram!("gateway_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_quota_check(class: &'static str, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "rejected" };
    counter!("gateway_quota_checks_total", "class" => class, "outcome" => outcome).increment(1);
}

pub fn record_rate_limited(class: &'static str) {
    counter!("gateway_rate_limited_total", "class" => class).increment(1);
}

pub fn record_retry() {
    counter!("gateway_retries_total").increment(1);
}

pub fn record_cache_event(event: &'static str) {
    counter!("gateway_cache_events_total", "event" => event).increment(1);
}
