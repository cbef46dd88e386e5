//! Single-backend reverse proxy guarded by a sliding-window circuit breaker.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::{BreakerState, CircuitBreaker, Outcome};
