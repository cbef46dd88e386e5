//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_breaker_rejections_total` (counter): requests refused by the breaker
//! - `proxy_breaker_transitions_total` (counter): state changes by from/to
//! - `proxy_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op (unit tests, metrics disabled)
//! - Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::BreakerState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    gauge!("proxy_breaker_state").set(BreakerState::Closed as u8 as f64);
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished proxied request. `outcome` is "success", "failure" or "rejected".
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_rejection(state: BreakerState) {
    counter!("proxy_breaker_rejections_total", "state" => state.as_str()).increment(1);
}

pub fn record_breaker_transition(from: BreakerState, to: BreakerState) {
    counter!(
        "proxy_breaker_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("proxy_breaker_state").set(to as u8 as f64);
}
