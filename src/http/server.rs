//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy route
//! - Wire up middleware (request ID, tracing, overall timeout)
//! - Serve on a bound listener until shutdown is broadcast
//! - Dispatch every request through the circuit breaker

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::http::dispatcher::Dispatcher;
use crate::http::forward::{ForwardError, Forwarder, HyperForwarder, UpstreamTarget};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::resilience::{BreakerConfigError, CircuitBreaker};

/// Errors building the server from configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid breaker settings: {0}")]
    Breaker(#[from] BreakerConfigError),

    #[error("invalid backend: {0}")]
    Backend(#[from] ForwardError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    breaker: Arc<CircuitBreaker>,
}

impl HttpServer {
    /// Create a server forwarding to `config.backend.url`.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let target = UpstreamTarget::parse(&config.backend.url)?;
        let forwarder = Arc::new(HyperForwarder::new(target));
        Self::with_forwarder(config, forwarder)
    }

    /// Create a server with a custom forwarding primitive.
    pub fn with_forwarder(
        config: ProxyConfig,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self, ServerError> {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.breaker)?);
        let dispatcher = Arc::new(Dispatcher::from_config(&config, Arc::clone(&breaker), forwarder));

        let router = Self::build_router(&config, AppState { dispatcher });
        Ok(Self {
            router,
            config,
            breaker,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// The breaker shared with the admin API.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.url,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.dispatcher.dispatch(request).await
}
