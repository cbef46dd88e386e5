//! A backend to put behind the proxy while trying it out.
//!
//! `GET /toggle` flips between healthy and failing; while failing every
//! other route answers 500, which trips the breaker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};

async fn hello(State(failing): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
    if failing.load(Ordering::Relaxed) {
        (StatusCode::INTERNAL_SERVER_ERROR, "Backend is failing")
    } else {
        (StatusCode::OK, "Hello from the backend")
    }
}

async fn toggle(State(failing): State<Arc<AtomicBool>>) -> &'static str {
    if failing.fetch_xor(true, Ordering::Relaxed) {
        "healthy"
    } else {
        "failing"
    }
}

#[tokio::main]
async fn main() {
    let failing = Arc::new(AtomicBool::new(false));
    let app = Router::new()
        .route("/toggle", get(toggle))
        .fallback(hello)
        .with_state(failing);

    let addr = SocketAddr::from(([127, 0, 0, 1], 8082));
    println!("Mock backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
