// SPDX-License-Identifier: Apache-2.0

//! Fault isolation around outbound calls.
//!
//! [`ReliabilityManager`] composes, per operation name: a lazily-created
//! circuit breaker around a retry loop around the caller's function. A
//! correlation id travels explicitly in a [`RequestContext`] value (scoped
//! per logical request, never process-wide) and is attached to the tracing
//! span for the whole composition. Timing and outcome are reported to the
//! injected [`Telemetry`] sink.
//!
//! Circuit-open errors are never retried here: the breaker is the backoff.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ReliabilityConfig;
use crate::error::PacerError;
use crate::telemetry::{NoopTelemetry, Telemetry};

mod circuit;
mod retry;

pub use circuit::{CircuitBreaker, CircuitPhase, CircuitSnapshot};
pub use retry::{BackoffKind, RetryPolicy, retry_with_policy};

/// Per-request context threaded through the call chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for tracing a logical request across layers.
    pub correlation_id: Uuid,
}

impl RequestContext {
    /// Create a context with a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-operation circuit breakers plus a shared retry policy.
pub struct ReliabilityManager {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    policy: RetryPolicy,
    breaker_threshold: u32,
    breaker_reset: std::time::Duration,
    telemetry: Arc<dyn Telemetry>,
}

impl ReliabilityManager {
    /// Create a manager from configuration with a no-op telemetry sink.
    #[must_use]
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self::with_telemetry(config, Arc::new(NoopTelemetry))
    }

    /// Create a manager reporting to `telemetry`.
    #[must_use]
    pub fn with_telemetry(config: &ReliabilityConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            policy: RetryPolicy::from_config(config),
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_reset: std::time::Duration::from_secs(config.circuit_breaker_reset_seconds),
            telemetry,
        }
    }

    /// Run `call` under the operation's circuit breaker and the retry
    /// policy.
    ///
    /// While the breaker is open the call is never invoked; the error names
    /// the operation, the failure count, and the next probe time. A retry
    /// exhaustion re-raises the last upstream error. Breaker state moves on
    /// the composed outcome, not on individual attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        ctx: &RequestContext,
        call: F,
    ) -> Result<T, PacerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PacerError>>,
    {
        let span = tracing::debug_span!(
            "reliable_call",
            operation,
            correlation_id = %ctx.correlation_id
        );

        async {
            let started = tokio::time::Instant::now();
            self.acquire(operation).await?;

            let result =
                retry_with_policy(&self.policy, operation, self.telemetry.as_ref(), call).await;

            self.settle(operation, result.is_ok()).await;
            self.telemetry
                .track_request(operation, started.elapsed(), result.is_ok());
            if let Err(err) = &result {
                self.telemetry.track_error(operation, &err.to_string());
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Check the operation's breaker, creating it on first use.
    async fn acquire(&self, operation: &str) -> Result<(), PacerError> {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(operation.to_string()).or_insert_with(|| {
            CircuitBreaker::new(operation, self.breaker_threshold, self.breaker_reset)
        });

        let before = breaker.phase();
        let admitted = breaker.try_acquire(Utc::now());
        if breaker.phase() != before {
            self.telemetry.track_circuit_state(operation, breaker.phase());
        }
        if admitted.is_err() {
            self.telemetry
                .track_error(operation, "circuit open, failing fast");
        }
        admitted
    }

    /// Fold the composed outcome into the operation's breaker.
    async fn settle(&self, operation: &str, success: bool) {
        let mut breakers = self.breakers.lock().await;
        let Some(breaker) = breakers.get_mut(operation) else {
            return;
        };
        let before = breaker.phase();
        if success {
            breaker.on_success();
        } else {
            breaker.on_failure(Utc::now());
        }
        if breaker.phase() != before {
            self.telemetry.track_circuit_state(operation, breaker.phase());
        }
    }

    /// Snapshot every breaker for monitoring callers.
    pub async fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        let breakers = self.breakers.lock().await;
        let mut snapshots: Vec<CircuitSnapshot> =
            breakers.values().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(threshold: u32, reset_seconds: u64) -> ReliabilityManager {
        ReliabilityManager::new(&ReliabilityConfig {
            circuit_breaker_threshold: threshold,
            circuit_breaker_reset_seconds: reset_seconds,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 10,
        })
    }

    fn transient() -> PacerError {
        PacerError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_through() {
        let manager = manager(3, 60);
        let ctx = RequestContext::new();
        let value = manager
            .execute("get_issue", &ctx, || async { Ok(7) })
            .await
            .expect("success");
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_fails_fast() {
        let manager = manager(2, 3_600);
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: Result<(), _> = manager
                .execute("get_issue", &ctx, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Third call fails fast: the wrapped function is never invoked.
        let result: Result<(), _> = manager
            .execute("get_issue", &ctx, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
        match result {
            Err(PacerError::CircuitOpen {
                operation,
                failures,
                ..
            }) => {
                assert_eq!(operation, "get_issue");
                assert_eq!(failures, 2);
            }
            other => panic!("expected circuit open, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn breakers_are_per_operation() {
        let manager = manager(1, 3_600);
        let ctx = RequestContext::new();

        let _: Result<(), _> = manager
            .execute("get_issue", &ctx, || async { Err(transient()) })
            .await;

        // A different operation is unaffected.
        manager
            .execute("list_repos", &ctx, || async { Ok(()) })
            .await
            .expect("other operation");

        let snapshots = manager.circuit_snapshots().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].operation, "get_issue");
        assert_eq!(snapshots[0].phase, CircuitPhase::Open);
        assert_eq!(snapshots[1].phase, CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes_breaker() {
        // Zero reset timeout: the breaker is immediately eligible for a
        // probe after opening.
        let manager = manager(1, 0);
        let ctx = RequestContext::new();

        let _: Result<(), _> = manager
            .execute("get_issue", &ctx, || async { Err(transient()) })
            .await;

        let value = manager
            .execute("get_issue", &ctx, || async { Ok(1) })
            .await
            .expect("probe success");
        assert_eq!(value, 1);

        let snapshots = manager.circuit_snapshots().await;
        assert_eq!(snapshots[0].phase, CircuitPhase::Closed);
        assert_eq!(snapshots[0].consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_breaker() {
        let manager = manager(1, 0);
        let ctx = RequestContext::new();

        for _ in 0..2 {
            let _: Result<(), _> = manager
                .execute("get_issue", &ctx, || async { Err(transient()) })
                .await;
        }

        let snapshots = manager.circuit_snapshots().await;
        assert_eq!(snapshots[0].phase, CircuitPhase::Open);
        assert_eq!(snapshots[0].consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_compose_inside_the_breaker() {
        let manager = ReliabilityManager::new(&ReliabilityConfig {
            circuit_breaker_threshold: 2,
            circuit_breaker_reset_seconds: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 10,
        });
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);

        let value = manager
            .execute("get_issue", &ctx, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(transient()) } else { Ok(n) }
            })
            .await
            .expect("retried to success");

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The composed call succeeded, so the breaker saw no failure.
        let snapshots = manager.circuit_snapshots().await;
        assert_eq!(snapshots[0].consecutive_failures, 0);
        assert_eq!(snapshots[0].phase, CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn contexts_carry_distinct_correlation_ids() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
