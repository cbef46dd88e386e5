//! breaker-proxy
//!
//! A reverse proxy for one backend that stops forwarding while the backend
//! is failing.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 BREAKER PROXY                │
//!     Client Request     │  ┌────────┐   ┌────────────┐   ┌──────────┐  │
//!     ───────────────────┼─▶│  http  │──▶│ dispatcher │──▶│ forward  │──┼──▶ Backend
//!                        │  │ server │   └─────┬──────┘   └────┬─────┘  │
//!                        │  └────────┘         │ admit?        │ outcome│
//!                        │                     ▼               ▼        │
//!     503 when open      │              ┌──────────────────────────┐    │
//!     ◀──────────────────┼──────────────│ circuit breaker + window │    │
//!                        │              └──────────────────────────┘    │
//!                        │  config · observability · lifecycle · admin  │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use breaker_proxy::config::{self, ProxyConfig};
use breaker_proxy::lifecycle;
use breaker_proxy::observability::logging;

const DEFAULT_CONFIG_PATH: &str = "config/proxy.toml";

#[derive(Parser)]
#[command(name = "breaker-proxy", version)]
#[command(about = "Reverse proxy with a sliding-window circuit breaker", long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load(args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_tracing(&Default::default());
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init_tracing(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backend = %config.backend.url,
        failure_ratio = config.breaker.failure_ratio,
        lookback_period = config.breaker.lookback_period,
        open_duration_ms = config.breaker.open_duration_ms,
        "Configuration loaded"
    );

    match lifecycle::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy failed");
            ExitCode::FAILURE
        }
    }
}

/// An explicit path must exist; the default path falls back to built-in defaults.
fn load(path: Option<PathBuf>) -> Result<ProxyConfig, config::ConfigError> {
    match path {
        Some(path) => config::load_config(&path),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                config::load_config(&path)
            } else {
                Ok(ProxyConfig::default())
            }
        }
    }
}
