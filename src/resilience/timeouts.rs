//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls with a deadline
//! - Cancel the upstream future cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout and count as failures

use std::future::Future;
use std::time::Duration;

/// Deadline applied to upstream calls. `None` leaves them unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeout(Option<Duration>);

impl UpstreamTimeout {
    /// Milliseconds from config; 0 disables the deadline.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self(None)
        } else {
            Self(Some(Duration::from_millis(ms)))
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.0
    }

    /// This deadline, or `fallback` when unbounded.
    pub fn or_limit(self, fallback: Duration) -> Self {
        Self(self.0.or(Some(fallback)))
    }

    /// Run `fut` under the deadline. `Err(limit)` when it expired.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Duration> {
        match self.0 {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
            None => Ok(fut.await),
        }
    }
}
