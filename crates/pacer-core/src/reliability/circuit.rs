// SPDX-License-Identifier: Apache-2.0

//! Per-operation circuit breaker.
//!
//! State machine:
//! - **Closed**: normal operation, calls pass through.
//! - **Open**: threshold reached, calls fail fast without touching the
//!   upstream.
//! - **Half-Open**: reset timeout elapsed; exactly one probe is allowed
//!   through. Success closes the circuit, failure reopens it.
//!
//! The open -> half-open transition happens lazily on the next acquisition
//! attempt; there is no background timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PacerError;

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitPhase {
    /// Normal operation.
    Closed,
    /// Failing fast.
    Open,
    /// Probing with a single call.
    HalfOpen,
}

/// Serializable breaker state for monitoring callers.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    /// Operation the breaker guards.
    pub operation: String,
    /// Current phase.
    pub phase: CircuitPhase,
    /// Consecutive failure count.
    pub consecutive_failures: u32,
    /// When the last failure happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Earliest time a probe will be admitted, when open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

/// Circuit breaker for one operation name.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation: String,
    threshold: u32,
    reset_timeout: Duration,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    phase: CircuitPhase,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// `threshold` consecutive failures open it; an open breaker admits a
    /// probe once `reset_timeout` has elapsed since the last failure.
    #[must_use]
    pub fn new(operation: impl Into<String>, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            threshold: threshold.max(1),
            reset_timeout,
            consecutive_failures: 0,
            last_failure_at: None,
            phase: CircuitPhase::Closed,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CircuitPhase {
        self.phase
    }

    /// Earliest time a probe will be admitted.
    fn retry_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_failure_at?;
        chrono::Duration::from_std(self.reset_timeout)
            .ok()
            .map(|timeout| last + timeout)
    }

    /// Ask to run a call now.
    ///
    /// Returns `Ok` when the call may proceed (closed, or open long enough
    /// to admit a probe - which moves the breaker to half-open). Fails fast
    /// with [`PacerError::CircuitOpen`] otherwise; the wrapped call is never
    /// invoked in that case.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<(), PacerError> {
        match self.phase {
            CircuitPhase::Closed => Ok(()),
            CircuitPhase::Open => {
                let retry_at = self.retry_at().unwrap_or(now);
                if now >= retry_at {
                    self.phase = CircuitPhase::HalfOpen;
                    Ok(())
                } else {
                    Err(self.open_error(retry_at))
                }
            }
            // A probe is already in flight; only one is allowed.
            CircuitPhase::HalfOpen => {
                let retry_at = self.retry_at().unwrap_or(now);
                Err(self.open_error(retry_at))
            }
        }
    }

    /// Record a successful call. Closes the breaker and zeroes the failure
    /// count.
    pub fn on_success(&mut self) {
        self.phase = CircuitPhase::Closed;
        self.consecutive_failures = 0;
    }

    /// Record a failed call.
    pub fn on_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        self.last_failure_at = Some(now);
        if self.phase == CircuitPhase::HalfOpen || self.consecutive_failures >= self.threshold {
            self.phase = CircuitPhase::Open;
        }
    }

    /// Serializable state.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            operation: self.operation.clone(),
            phase: self.phase,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_at,
            retry_at: (self.phase != CircuitPhase::Closed)
                .then(|| self.retry_at())
                .flatten(),
        }
    }

    fn open_error(&self, retry_at: DateTime<Utc>) -> PacerError {
        PacerError::CircuitOpen {
            operation: self.operation.clone(),
            failures: self.consecutive_failures,
            retry_at,
        }
    }
}
