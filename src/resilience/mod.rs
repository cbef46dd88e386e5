//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admit or refuse)
//!     → timeouts.rs (enforce upstream deadline)
//!     → outcome reported through the permit
//!     → window.rs (sliding counts, may trip the breaker)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable by default; expiry is a failure
//! - No retries: a refused or failed request is answered once
//! - Circuit breaker prevents hammering a failing backend

pub mod circuit_breaker;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{
    BreakerConfigError, BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker, Permit,
    Rejected, Transition,
};
pub use timeouts::UpstreamTimeout;
pub use window::{Outcome, OutcomeWindow, WindowSnapshot};
