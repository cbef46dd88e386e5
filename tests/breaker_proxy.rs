//! End-to-end behaviour of the proxy in front of a real socket backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breaker_proxy::BreakerState;

mod common;

#[tokio::test]
async fn forwards_while_closed() {
    let backend = common::start_programmable_backend(|| async { (200, "hello".into()) }).await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.5, 4, Duration::from_secs(5))).await;

    let res = common::client().get(proxy.url("/greeting")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hello");

    let snapshot = proxy.breaker.snapshot();
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.successes, 1);
    assert_eq!(snapshot.failures, 0);
}

#[tokio::test]
async fn request_id_is_preserved() {
    let backend = common::start_programmable_backend(|| async { (200, "ok".into()) }).await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.5, 4, Duration::from_secs(5))).await;

    let res = common::client()
        .get(proxy.url("/"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn trips_and_stops_calling_backend() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (500, "boom".into())
        }
    })
    .await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.5, 2, Duration::from_secs(60))).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 500);
    }
    assert_eq!(proxy.breaker.state(), BreakerState::Open);

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers()["x-circuit-breaker"], "open");
    assert!(res.headers().contains_key("retry-after"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Refusals are never recorded.
    let snapshot = proxy.breaker.snapshot();
    assert_eq!(snapshot.window_len, 0);
}

#[tokio::test]
async fn probe_recovers_after_open_duration() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let backend = common::start_programmable_backend(move || {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (200, "recovered".into())
            } else {
                (502, "down".into())
            }
        }
    })
    .await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.9, 2, Duration::from_millis(200))).await;
    let client = common::client();

    for _ in 0..2 {
        client.get(proxy.url("/")).send().await.unwrap();
    }
    assert_eq!(proxy.breaker.state(), BreakerState::Open);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "recovered");
    assert_eq!(proxy.breaker.state(), BreakerState::Closed);
    assert_eq!(proxy.breaker.snapshot().window_len, 0);
}

#[tokio::test]
async fn failed_probe_reopens() {
    let backend = common::start_programmable_backend(|| async { (503, "still down".into()) }).await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.9, 1, Duration::from_millis(100))).await;
    let client = common::client();

    client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(proxy.breaker.state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert!(!res.headers().contains_key("x-circuit-breaker"));
    assert_eq!(proxy.breaker.state(), BreakerState::Open);

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.headers()["x-circuit-breaker"], "open");
}

#[tokio::test]
async fn unreachable_backend_is_a_failure() {
    let backend = common::closed_port().await;
    let proxy = common::start_proxy(common::proxy_config(backend, 0.5, 2, Duration::from_secs(60))).await;
    let client = common::client();

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(proxy.breaker.snapshot().failures, 1);

    client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(proxy.breaker.state(), BreakerState::Open);
}

#[tokio::test]
async fn slow_backend_times_out_as_failure() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        (200, "late".into())
    })
    .await;
    let mut config = common::proxy_config(backend, 0.5, 4, Duration::from_secs(60));
    config.timeouts.upstream_ms = 100;
    let proxy = common::start_proxy(config).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    assert_eq!(proxy.breaker.snapshot().failures, 1);
}
