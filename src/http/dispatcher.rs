//! Proxy dispatch: admission, forwarding, outcome reporting.
//!
//! # Data Flow
//! ```text
//! request
//!     → CircuitBreaker::try_acquire
//!         refused → 503 (no backend call, no outcome)
//!         admitted → spawned attempt task
//!             → Forwarder::forward under UpstreamTimeout
//!             → classify → Permit::record (exactly once)
//!     → response, 502 or 504
//! ```
//!
//! # Design Decisions
//! - The attempt runs on its own task and owns the permit, so a client that
//!   goes away mid-request cannot leave the attempt unrecorded
//! - Upstream 5xx counts as a failure unless configured otherwise
//! - A probe is always bounded: with no upstream deadline configured it falls
//!   back to the breaker's open duration, so HalfOpen cannot wedge
//! - The deadline covers the wait for response headers only; the outcome is
//!   recorded before the body streams, so a backend stalling mid-body still
//!   counts as a success

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;

use crate::config::ProxyConfig;
use crate::http::forward::{ForwardError, Forwarder};
use crate::http::request::RequestIdExt;
use crate::http::response;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, Outcome, UpstreamTimeout};

/// Orchestrates one request against the breaker and the forwarder.
pub struct Dispatcher {
    breaker: Arc<CircuitBreaker>,
    forwarder: Arc<dyn Forwarder>,
    timeout: UpstreamTimeout,
    server_errors_are_failures: bool,
}

impl Dispatcher {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        forwarder: Arc<dyn Forwarder>,
        timeout: UpstreamTimeout,
        server_errors_are_failures: bool,
    ) -> Self {
        Self {
            breaker,
            forwarder,
            timeout,
            server_errors_are_failures,
        }
    }

    pub fn from_config(
        config: &ProxyConfig,
        breaker: Arc<CircuitBreaker>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self::new(
            breaker,
            forwarder,
            UpstreamTimeout::from_millis(config.timeouts.upstream_ms),
            config.breaker.server_errors_are_failures,
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let request_id = request.request_id().to_string();
        let method = request.method().to_string();

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                tracing::debug!(
                    request_id = %request_id,
                    state = %rejected.state,
                    "Breaker refused request"
                );
                metrics::record_breaker_rejection(rejected.state);
                metrics::record_request(&method, StatusCode::SERVICE_UNAVAILABLE.as_u16(), "rejected", start);
                return response::breaker_open(&rejected);
            }
        };

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %request.uri().path(),
            probe = permit.is_probe(),
            "Forwarding request"
        );

        let forwarder = Arc::clone(&self.forwarder);
        let timeout = if permit.is_probe() {
            self.timeout.or_limit(self.breaker.settings().open_duration())
        } else {
            self.timeout
        };
        let server_errors_are_failures = self.server_errors_are_failures;

        let attempt = tokio::spawn(async move {
            let result = match timeout.run(forwarder.forward(request)).await {
                Ok(result) => result,
                Err(limit) => Err(ForwardError::Timeout(limit)),
            };
            let outcome = classify(&result, server_errors_are_failures);
            permit.record(outcome);
            result
        });

        let (response, status, outcome) = match attempt.await {
            Ok(Ok(upstream)) => {
                let status = upstream.status();
                let outcome = classify_status(status, server_errors_are_failures);
                (upstream, status, outcome)
            }
            Ok(Err(ForwardError::Timeout(limit))) => {
                tracing::warn!(request_id = %request_id, timeout = ?limit, "Upstream timed out");
                (response::gateway_timeout(), StatusCode::GATEWAY_TIMEOUT, Outcome::Failure)
            }
            Ok(Err(e)) => {
                tracing::error!(request_id = %request_id, error = %e, "Upstream error");
                (response::bad_gateway(), StatusCode::BAD_GATEWAY, Outcome::Failure)
            }
            Err(join_error) => {
                // The permit was dropped with the task and has reported a failure.
                tracing::error!(request_id = %request_id, error = %join_error, "Forwarding task aborted");
                (response::bad_gateway(), StatusCode::BAD_GATEWAY, Outcome::Failure)
            }
        };

        metrics::record_request(&method, status.as_u16(), outcome.as_str(), start);
        response
    }
}

/// Outcome of one forwarding attempt.
pub fn classify(
    result: &Result<Response<Body>, ForwardError>,
    server_errors_are_failures: bool,
) -> Outcome {
    match result {
        Ok(response) => classify_status(response.status(), server_errors_are_failures),
        Err(_) => Outcome::Failure,
    }
}

fn classify_status(status: StatusCode, server_errors_are_failures: bool) -> Outcome {
    if server_errors_are_failures && status.is_server_error() {
        Outcome::Failure
    } else {
        Outcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::forward::ForwardFuture;
    use crate::http::response::X_CIRCUIT_BREAKER;
    use crate::resilience::{BreakerSettings, BreakerState};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Reply {
        Status(u16),
        Refused,
        Hang,
    }

    /// Replays scripted replies and counts calls.
    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Forwarder for Scripted {
        fn forward(&self, _request: Request<Body>) -> ForwardFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Status(200));
            Box::pin(async move {
                match reply {
                    Reply::Status(code) => Ok(Response::builder()
                        .status(code)
                        .body(Body::empty())
                        .unwrap()),
                    Reply::Refused => Err(ForwardError::Transport(Box::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    )))),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        unreachable!("upstream timeout should fire first")
                    }
                }
            })
        }
    }

    fn dispatcher(
        forwarder: Arc<Scripted>,
        ratio: f64,
        lookback: usize,
        open: Duration,
    ) -> Dispatcher {
        dispatcher_with_timeout(forwarder, ratio, lookback, open, UpstreamTimeout::from_millis(50))
    }

    fn dispatcher_with_timeout(
        forwarder: Arc<Scripted>,
        ratio: f64,
        lookback: usize,
        open: Duration,
        timeout: UpstreamTimeout,
    ) -> Dispatcher {
        let settings = BreakerSettings::new(ratio, lookback, open).unwrap();
        Dispatcher::new(Arc::new(CircuitBreaker::new(settings)), forwarder, timeout, true)
    }

    fn get() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn passes_through_and_records_success() {
        let upstream = Scripted::new([Reply::Status(200)]);
        let d = dispatcher(upstream.clone(), 0.5, 4, Duration::from_secs(10));

        let response = d.dispatch(get()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.calls(), 1);
        assert_eq!(d.breaker().window().successes, 1);
    }

    #[tokio::test]
    async fn transport_error_is_bad_gateway_and_failure() {
        let upstream = Scripted::new([Reply::Refused]);
        let d = dispatcher(upstream, 0.5, 4, Duration::from_secs(10));

        let response = d.dispatch(get()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(d.breaker().window().failures, 1);
    }

    #[tokio::test]
    async fn timeout_is_gateway_timeout_and_failure() {
        let upstream = Scripted::new([Reply::Hang]);
        let d = dispatcher(upstream, 0.5, 4, Duration::from_secs(10));

        let response = d.dispatch(get()).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(d.breaker().window().failures, 1);
    }

    #[tokio::test]
    async fn server_error_passes_through_but_counts_as_failure() {
        let upstream = Scripted::new([Reply::Status(500), Reply::Status(404)]);
        let d = dispatcher(upstream, 0.5, 4, Duration::from_secs(10));

        assert_eq!(d.dispatch(get()).await.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(d.dispatch(get()).await.status(), StatusCode::NOT_FOUND);
        let window = d.breaker().window();
        assert_eq!((window.successes, window.failures), (1, 1));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let upstream = Scripted::new([Reply::Status(502), Reply::Status(503)]);
        let d = dispatcher(upstream.clone(), 0.5, 2, Duration::from_secs(60));

        d.dispatch(get()).await;
        d.dispatch(get()).await;
        assert_eq!(d.breaker().state(), BreakerState::Open);

        for _ in 0..5 {
            let response = d.dispatch(get()).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(response.headers()[X_CIRCUIT_BREAKER], "open");
        }
        assert_eq!(upstream.calls(), 2);
        assert!(d.breaker().window().is_empty());
    }

    #[tokio::test]
    async fn recovers_through_probe() {
        let upstream = Scripted::new([Reply::Refused, Reply::Status(200), Reply::Status(200)]);
        let d = dispatcher(upstream.clone(), 0.5, 1, Duration::from_millis(30));

        assert_eq!(d.dispatch(get()).await.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(d.breaker().state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(d.dispatch(get()).await.status(), StatusCode::OK);
        assert_eq!(d.breaker().state(), BreakerState::Closed);
        assert!(d.breaker().window().is_empty());

        assert_eq!(d.dispatch(get()).await.status(), StatusCode::OK);
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_request_is_still_recorded() {
        let upstream = Scripted::new([Reply::Hang]);
        let d = Arc::new(dispatcher(upstream, 0.5, 4, Duration::from_secs(10)));

        let task = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch(get()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();
        let _ = task.await;

        // The detached attempt still resolves through the upstream timeout.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(d.breaker().window().failures, 1);
    }

    #[tokio::test]
    async fn second_request_refused_while_probe_in_flight() {
        let upstream = Scripted::new([Reply::Refused, Reply::Hang]);
        let d = Arc::new(dispatcher_with_timeout(
            upstream.clone(),
            0.5,
            1,
            Duration::from_millis(30),
            UpstreamTimeout::from_millis(300),
        ));

        assert_eq!(d.dispatch(get()).await.status(), StatusCode::BAD_GATEWAY);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let probe = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch(get()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(d.breaker().state(), BreakerState::HalfOpen);

        let response = d.dispatch(get()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[X_CIRCUIT_BREAKER], "open");
        assert_eq!(upstream.calls(), 2);

        assert_eq!(probe.await.unwrap().status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(d.breaker().state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn hung_probe_without_upstream_deadline_still_resolves() {
        let upstream = Scripted::new([Reply::Refused, Reply::Hang, Reply::Status(200)]);
        let d = Arc::new(dispatcher_with_timeout(
            upstream.clone(),
            0.5,
            1,
            Duration::from_millis(50),
            UpstreamTimeout::from_millis(0),
        ));

        assert_eq!(d.dispatch(get()).await.status(), StatusCode::BAD_GATEWAY);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let client = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch(get()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.abort();
        let _ = client.await;

        // The probe gives up after the open duration and re-opens the breaker.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(d.breaker().state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(d.dispatch(get()).await.status(), StatusCode::OK);
        assert_eq!(d.breaker().state(), BreakerState::Closed);
        assert_eq!(upstream.calls(), 3);
    }

    #[test]
    fn classification() {
        let ok = |code: u16| -> Result<Response<Body>, ForwardError> {
            Ok(Response::builder().status(code).body(Body::empty()).unwrap())
        };
        assert_eq!(classify(&ok(200), true), Outcome::Success);
        assert_eq!(classify(&ok(404), true), Outcome::Success);
        assert_eq!(classify(&ok(503), true), Outcome::Failure);
        assert_eq!(classify(&ok(503), false), Outcome::Success);
        assert_eq!(
            classify(&Err(ForwardError::Timeout(Duration::from_secs(1))), false),
            Outcome::Failure
        );
    }
}
