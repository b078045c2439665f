// SPDX-License-Identifier: Apache-2.0

//! Pluggable observability sink.
//!
//! The host injects a [`Telemetry`] implementation; the gateway reports
//! request timing, errors, retries, and circuit-breaker transitions to it.
//! [`NoopTelemetry`] and [`LogTelemetry`] are reference implementations, not
//! requirements - hosts with a metrics pipeline provide their own.

use std::time::Duration;

use crate::reliability::CircuitPhase;

/// Observability sink for gateway events.
pub trait Telemetry: Send + Sync {
    /// A request completed (successfully or not) after `duration`.
    fn track_request(&self, operation: &str, duration: Duration, success: bool);

    /// A request failed with `error`.
    fn track_error(&self, operation: &str, error: &str);

    /// A named numeric measurement.
    fn track_metric(&self, name: &str, value: f64);

    /// A retry is about to sleep `delay` before attempt `attempt`.
    fn track_retry(&self, operation: &str, attempt: u32, delay: Duration);

    /// A circuit breaker changed phase.
    fn track_circuit_state(&self, operation: &str, phase: CircuitPhase);
}

/// Telemetry sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track_request(&self, _operation: &str, _duration: Duration, _success: bool) {}
    fn track_error(&self, _operation: &str, _error: &str) {}
    fn track_metric(&self, _name: &str, _value: f64) {}
    fn track_retry(&self, _operation: &str, _attempt: u32, _delay: Duration) {}
    fn track_circuit_state(&self, _operation: &str, _phase: CircuitPhase) {}
}

/// Telemetry sink that emits structured tracing events.
///
/// Useful during development: pipe `RUST_LOG=pacer_core=debug` output to jq
/// and filter on the `duration_ms` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn track_request(&self, operation: &str, duration: Duration, success: bool) {
        tracing::debug!(
            operation,
            duration_ms = duration.as_millis() as u64,
            success,
            "request completed"
        );
    }

    fn track_error(&self, operation: &str, error: &str) {
        tracing::warn!(operation, error, "request failed");
    }

    fn track_metric(&self, name: &str, value: f64) {
        tracing::debug!(metric = name, value, "metric");
    }

    fn track_retry(&self, operation: &str, attempt: u32, delay: Duration) {
        tracing::debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying"
        );
    }

    fn track_circuit_state(&self, operation: &str, phase: CircuitPhase) {
        tracing::info!(operation, ?phase, "circuit breaker transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_accepts_all_events() {
        let sink = NoopTelemetry;
        sink.track_request("op", Duration::from_millis(5), true);
        sink.track_error("op", "boom");
        sink.track_metric("cache.hits", 1.0);
        sink.track_retry("op", 2, Duration::from_millis(100));
        sink.track_circuit_state("op", CircuitPhase::Open);
    }

    #[test]
    fn sinks_are_object_safe() {
        let sinks: Vec<Box<dyn Telemetry>> = vec![Box::new(NoopTelemetry), Box::new(LogTelemetry)];
        for sink in &sinks {
            sink.track_metric("governor.queue_depth", 0.0);
        }
    }
}
