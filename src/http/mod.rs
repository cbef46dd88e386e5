//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route)
//!     → request.rs (request ID)
//!     → dispatcher.rs (circuit breaker admission)
//!     → forward.rs (rewrite + send to backend)
//!     → response.rs (synthetic errors, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::Dispatcher;
pub use forward::{ForwardError, Forwarder, HyperForwarder, UpstreamTarget};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::X_CIRCUIT_BREAKER;
pub use server::{HttpServer, ServerError};
