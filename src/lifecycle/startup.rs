//! Startup orchestration.
//!
//! # Order
//! 1. Metrics exporter (optional)
//! 2. Circuit breaker, forwarder, router
//! 3. Proxy listener, then admin listener (optional)
//! 4. Wait for a stop signal, broadcast shutdown, drain
//!
//! Any startup error is fatal; listeners bind last so traffic only arrives
//! once every subsystem is ready.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{serve_admin, AdminState};
use crate::config::ProxyConfig;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("server setup failed: {0}")]
    Server(#[from] ServerError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("metrics exporter failed: {0}")]
    Metrics(#[from] BuildError),

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Run the proxy until SIGINT/SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    run_until(config, signals::shutdown_signal()).await
}

/// Run the proxy until `stop` resolves.
pub async fn run_until(
    config: ProxyConfig,
    stop: impl Future<Output = ()>,
) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = parse_addr(&config.observability.metrics_address)?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(config.clone())?;
    let breaker = server.breaker();

    let shutdown = Shutdown::new();
    let listener = bind(&config.listener.bind_address).await?;
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let admin_task = if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        let state = AdminState {
            breaker,
            api_key: Arc::from(config.admin.api_key.as_str()),
            backend_url: Arc::from(config.backend.url.as_str()),
        };
        Some(tokio::spawn(serve_admin(listener, state, shutdown.subscribe())))
    } else {
        None
    };

    let early_exit = tokio::select! {
        _ = stop => None,
        result = &mut server_task => Some(result),
    };

    shutdown.trigger();

    let server_result = match early_exit {
        Some(result) => result,
        None => server_task.await,
    };
    if let Some(admin_task) = admin_task {
        if let Err(e) = admin_task.await.map_err(io::Error::other).and_then(|r| r) {
            tracing::error!(error = %e, "Admin API stopped with error");
        }
    }

    server_result
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(StartupError::Serve)
}

fn parse_addr(address: &str) -> Result<SocketAddr, StartupError> {
    address.parse().map_err(|e| StartupError::Bind {
        address: address.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    let addr = parse_addr(address)?;
    TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}
