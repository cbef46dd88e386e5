//! Response handling and transformation.
//!
//! # Responsibilities
//! - Build the synthetic responses the proxy answers with on its own
//! - Strip hop-by-hop headers from forwarded messages
//!
//! # Status Mapping
//! - Breaker refused → 503 Service Unavailable + `x-circuit-breaker: open`
//! - Backend transport error → 502 Bad Gateway
//! - Backend timeout → 504 Gateway Timeout

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::resilience::circuit_breaker::Rejected;

pub const X_CIRCUIT_BREAKER: HeaderName = HeaderName::from_static("x-circuit-breaker");

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Response for a request the breaker refused to forward.
pub fn breaker_open(rejected: &Rejected) -> Response {
    let retry_after = retry_after_secs(rejected.retry_after);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (X_CIRCUIT_BREAKER, HeaderValue::from_static("open")),
            (header::RETRY_AFTER, HeaderValue::from(retry_after)),
        ],
        "Circuit breaker open: backend temporarily unavailable",
    )
        .into_response()
}

pub fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

pub fn gateway_timeout() -> Response {
    (StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out").into_response()
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(remaining: Option<Duration>) -> u64 {
    remaining
        .map(|d| d.as_millis().div_ceil(1000) as u64)
        .unwrap_or(1)
        .max(1)
}

/// Remove connection-scoped headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
