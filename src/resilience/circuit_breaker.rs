//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: window full and failure ratio >= threshold
//! Open → Half-Open: first admission after open_duration has elapsed
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - One mutex guards the state and the outcome window together
//! - Admission hands out a `Permit`; the permit reports exactly one outcome
//! - Single probe in Half-Open (prevents hammering recovering backend)
//! - Open → Half-Open is evaluated lazily on admission, no background timer

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::window::{Outcome, OutcomeWindow, WindowSnapshot};

/// Invalid breaker settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BreakerConfigError {
    #[error("failure ratio must be strictly between 0 and 1, got {0}")]
    FailureRatio(f64),

    #[error("lookback period must be at least 1")]
    LookbackPeriod,
}

/// Validated breaker settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    failure_ratio: f64,
    lookback_period: usize,
    open_duration: Duration,
}

impl BreakerSettings {
    pub fn new(
        failure_ratio: f64,
        lookback_period: usize,
        open_duration: Duration,
    ) -> Result<Self, BreakerConfigError> {
        // NaN fails both comparisons and is rejected here too.
        if !(failure_ratio > 0.0 && failure_ratio < 1.0) {
            return Err(BreakerConfigError::FailureRatio(failure_ratio));
        }
        if lookback_period < 1 {
            return Err(BreakerConfigError::LookbackPeriod);
        }
        Ok(Self {
            failure_ratio,
            lookback_period,
            open_duration,
        })
    }

    pub fn open_duration(&self) -> Duration {
        self.open_duration
    }
}

impl TryFrom<&BreakerConfig> for BreakerSettings {
    type Error = BreakerConfigError;

    fn try_from(config: &BreakerConfig) -> Result<Self, Self::Error> {
        Self::new(
            config.failure_ratio,
            config.lookback_period,
            Duration::from_millis(config.open_duration_ms),
        )
    }
}

/// Externally visible breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, reported to the caller that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Admission refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: BreakerState,
    /// Time left until a probe may be admitted, when known.
    pub retry_after: Option<Duration>,
}

/// Point-in-time view of the breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub successes: usize,
    pub failures: usize,
    pub window_len: usize,
    pub lookback_period: usize,
    pub failure_ratio: Option<f64>,
    pub failure_ratio_threshold: f64,
    pub probe_in_flight: bool,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { since: Instant },
    /// The single probe is always in flight while in this phase.
    HalfOpen,
}

impl Phase {
    fn state(&self) -> BreakerState {
        match self {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    window: OutcomeWindow,
}

/// Sliding-window circuit breaker guarding a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                window: OutcomeWindow::new(settings.lookback_period),
            }),
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Result<Self, BreakerConfigError> {
        BreakerSettings::try_from(config).map(Self::new)
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Ask whether a request may be forwarded right now.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Permit, Rejected> {
        self.try_acquire_at(Instant::now())
    }

    /// Same as [`try_acquire`](Self::try_acquire) with an explicit clock reading.
    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Result<Permit, Rejected> {
        let mut inner = self.lock();

        let (kind, transition) = match inner.phase {
            Phase::Closed => (PermitKind::Normal, None),
            Phase::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed <= self.settings.open_duration {
                    return Err(Rejected {
                        state: BreakerState::Open,
                        retry_after: Some(self.settings.open_duration - elapsed),
                    });
                }
                inner.phase = Phase::HalfOpen;
                inner.window.reset();
                (
                    PermitKind::Probe,
                    Some(Transition {
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                    }),
                )
            }
            Phase::HalfOpen => {
                return Err(Rejected {
                    state: BreakerState::HalfOpen,
                    retry_after: None,
                });
            }
        };

        let snapshot = inner.window.snapshot();
        drop(inner);

        if let Some(transition) = transition {
            self.announce(transition, snapshot);
        }

        Ok(Permit {
            breaker: Arc::clone(self),
            kind,
            recorded: false,
        })
    }

    /// Current state without evaluating timers.
    pub fn state(&self) -> BreakerState {
        self.lock().phase.state()
    }

    pub fn window(&self) -> WindowSnapshot {
        self.lock().window.snapshot()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        let window = inner.window.snapshot();
        let retry_after_ms = match inner.phase {
            Phase::Open { since } => Some(
                self.settings
                    .open_duration
                    .saturating_sub(now.saturating_duration_since(since))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        BreakerSnapshot {
            state: inner.phase.state(),
            successes: window.successes,
            failures: window.failures,
            window_len: window.len(),
            lookback_period: self.settings.lookback_period,
            failure_ratio: inner.window.failure_ratio(),
            failure_ratio_threshold: self.settings.failure_ratio,
            probe_in_flight: inner.phase == Phase::HalfOpen,
            retry_after_ms,
        }
    }

    fn on_outcome(&self, kind: PermitKind, outcome: Outcome, now: Instant) -> Option<Transition> {
        let mut inner = self.lock();

        let transition = match (kind, inner.phase) {
            (PermitKind::Probe, Phase::HalfOpen) => {
                inner.window.reset();
                match outcome {
                    Outcome::Success => {
                        inner.phase = Phase::Closed;
                        Some(Transition {
                            from: BreakerState::HalfOpen,
                            to: BreakerState::Closed,
                        })
                    }
                    Outcome::Failure => {
                        inner.phase = Phase::Open { since: now };
                        Some(Transition {
                            from: BreakerState::HalfOpen,
                            to: BreakerState::Open,
                        })
                    }
                }
            }
            _ => {
                let snapshot = inner.window.record(outcome);
                let tripped = inner.phase == Phase::Closed
                    && snapshot.full
                    && inner
                        .window
                        .failure_ratio()
                        .is_some_and(|ratio| ratio >= self.settings.failure_ratio);

                if tripped {
                    inner.phase = Phase::Open { since: now };
                    inner.window.reset();
                    Some(Transition {
                        from: BreakerState::Closed,
                        to: BreakerState::Open,
                    })
                } else {
                    None
                }
            }
        };

        let snapshot = inner.window.snapshot();
        drop(inner);

        if let Some(transition) = transition {
            self.announce(transition, snapshot);
        }
        transition
    }

    fn announce(&self, transition: Transition, window: WindowSnapshot) {
        match transition.to {
            BreakerState::Open => tracing::warn!(
                from = %transition.from,
                open_duration_ms = self.settings.open_duration.as_millis() as u64,
                "Circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::info!("Circuit breaker half-open, admitting probe"),
            BreakerState::Closed => tracing::info!(
                successes = window.successes,
                failures = window.failures,
                "Circuit breaker closed"
            ),
        }
        metrics::record_breaker_transition(transition.from, transition.to);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Probe,
}

/// Permission to forward one request.
///
/// Reports exactly one outcome: either through [`record`](Permit::record) or,
/// if dropped unrecorded, as a failure.
#[derive(Debug)]
#[must_use = "a permit reports a failure if dropped without recording an outcome"]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    kind: PermitKind,
    recorded: bool,
}

impl Permit {
    /// True when this permit is the Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.kind == PermitKind::Probe
    }

    pub fn record(self, outcome: Outcome) -> Option<Transition> {
        self.record_at(outcome, Instant::now())
    }

    pub fn record_at(mut self, outcome: Outcome, now: Instant) -> Option<Transition> {
        self.recorded = true;
        self.breaker.on_outcome(self.kind, outcome, now)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.recorded {
            tracing::warn!(probe = self.is_probe(), "Permit dropped without outcome, counting as failure");
            self.breaker.on_outcome(self.kind, Outcome::Failure, Instant::now());
        }
    }
}
