//! Sliding window of recent request outcomes.
//!
//! # Responsibilities
//! - Keep the most recent `capacity` outcomes in arrival order
//! - Maintain success/failure counters alongside the sequence
//! - Answer failure ratio queries
//!
//! # Design Decisions
//! - Not thread-safe on its own; owned by the circuit breaker, which guards it
//! - Eviction and insertion happen inside one `&mut self` call
//! - An empty window has no ratio (`None`), never 0.0

use std::collections::VecDeque;

use serde::Serialize;

/// Classification of one completed proxy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Counts returned after every insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowSnapshot {
    pub successes: usize,
    pub failures: usize,
    pub full: bool,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.successes + self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded, ordered record of the most recent outcomes.
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    outcomes: VecDeque<Outcome>,
    capacity: usize,
    successes: usize,
    failures: usize,
}

impl OutcomeWindow {
    /// Create an empty window. A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
            successes: 0,
            failures: 0,
        }
    }

    /// Append an outcome, evicting the oldest one when at capacity.
    pub fn record(&mut self, outcome: Outcome) -> WindowSnapshot {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                match evicted {
                    Outcome::Success => self.successes -= 1,
                    Outcome::Failure => self.failures -= 1,
                }
            }
        }

        self.outcomes.push_back(outcome);
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
        }

        self.snapshot()
    }

    /// `failures / total`, or `None` when nothing has been recorded.
    pub fn failure_ratio(&self) -> Option<f64> {
        let total = self.successes + self.failures;
        if total == 0 {
            return None;
        }
        Some(self.failures as f64 / total as f64)
    }

    /// Drop all history.
    pub fn reset(&mut self) {
        self.outcomes.clear();
        self.successes = 0;
        self.failures = 0;
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            successes: self.successes,
            failures: self.failures,
            full: self.is_full(),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.outcomes.len() == self.capacity
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Outcomes from oldest to newest.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter()
    }
}
