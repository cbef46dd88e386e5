//! Admin API.
//!
//! Read-only view of the proxy for operators and `proxy-cli`:
//! - `GET /admin/status`: version and backend
//! - `GET /admin/breaker`: circuit breaker state and window counts
//!
//! Every route requires the configured bearer key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::resilience::CircuitBreaker;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub breaker: Arc<CircuitBreaker>,
    pub api_key: Arc<str>,
    pub backend_url: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breaker", get(get_breaker))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
