// SPDX-License-Identifier: Apache-2.0

//! Retry with configurable backoff for transient failures.
//!
//! Delay sequences come from `backon`'s builders for the exponential and
//! constant shapes; the linear shape produces the same `Duration` iterator
//! contract in-crate. Jitter (when enabled) spreads each computed delay over
//! a +/-50% band so synchronized callers do not retry in lockstep.
//!
//! Only retryable errors are re-attempted: [`PacerError::is_retryable`]
//! covers the explicit cases (provider-reported rate limits, timeouts,
//! connection failures, allow-listed HTTP statuses); everything else is
//! re-raised immediately.

use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};

use crate::error::PacerError;
use crate::telemetry::Telemetry;

/// Shape of the delay sequence between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Delay doubles each attempt.
    Exponential,
    /// Delay grows by `base_delay` each attempt.
    Linear,
    /// Every delay is `base_delay`.
    Constant,
}

/// Retry policy.
#[derive(Debug, Clone, bon::Builder)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    #[builder(default = 3)]
    pub max_attempts: u32,
    /// First delay.
    #[builder(default = Duration::from_secs(1))]
    pub base_delay: Duration,
    /// Delay ceiling before jitter.
    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,
    /// Delay shape.
    #[builder(default = BackoffKind::Exponential)]
    pub backoff: BackoffKind,
    /// Spread each delay over a +/-50% band.
    #[builder(default = true)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::ReliabilityConfig) -> Self {
        Self::builder()
            .max_attempts(config.retry_max_attempts)
            .base_delay(Duration::from_millis(config.retry_base_delay_ms))
            .max_delay(Duration::from_millis(config.retry_max_delay_ms))
            .build()
    }

    /// The delay sequence between attempts (length `max_attempts - 1`).
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        let count = self.max_attempts.saturating_sub(1) as usize;
        match self.backoff {
            BackoffKind::Exponential => ExponentialBuilder::default()
                .with_factor(2.0)
                .with_min_delay(self.base_delay)
                .with_max_delay(self.max_delay)
                .with_max_times(count)
                .build()
                .take(count)
                .collect(),
            BackoffKind::Constant => ConstantBuilder::default()
                .with_delay(self.base_delay)
                .with_max_times(count)
                .build()
                .take(count)
                .collect(),
            BackoffKind::Linear => (1..=count as u32)
                .map(|i| (self.base_delay * i).min(self.max_delay))
                .collect(),
        }
    }

    /// Apply jitter to a computed delay.
    #[must_use]
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        // 0.5x to 1.5x of the computed delay.
        delay.mul_f64(0.5 + fastrand::f64())
    }
}

/// Run `call` under `policy`, re-raising the last error when attempts are
/// exhausted or the error is not retryable.
///
/// Each sleep is reported to `telemetry` before it starts.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    telemetry: &dyn Telemetry,
    mut call: F,
) -> Result<T, PacerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PacerError>>,
{
    let delays = policy.delays();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !err.is_retryable() {
                    return Err(err);
                }
                let delay = policy.jittered(delays[(attempt - 1) as usize]);
                telemetry.track_retry(operation, attempt + 1, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
