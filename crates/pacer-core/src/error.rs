// SPDX-License-Identifier: Apache-2.0

//! Error types for the Pacer gateway.
//!
//! Uses `thiserror` for deriving `std::error::Error` implementations.
//! Binary and integration code should use `anyhow::Result` for top-level
//! error handling.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::governor::Resource;

/// Errors that can occur while routing a call through the gateway.
#[derive(Error, Debug)]
pub enum PacerError {
    /// The provider reported a quota exhaustion the local estimate did not
    /// predict. Carries the authoritative reset data so the governor can
    /// force its pool state before the next admission check.
    #[error("rate limit exceeded on {resource} pool, resets at {reset_at}")]
    RateLimited {
        /// Quota pool the provider rejected the call on.
        resource: Resource,
        /// Total budget for the current window, if reported.
        limit: Option<u32>,
        /// Remaining budget as reported (usually 0).
        remaining: u32,
        /// When the window resets.
        reset_at: DateTime<Utc>,
    },

    /// Circuit breaker is open for this operation - the call was never made.
    #[error("circuit open for '{operation}' after {failures} failures, retry at {retry_at}")]
    CircuitOpen {
        /// Operation name the breaker guards.
        operation: String,
        /// Consecutive failure count that tripped the breaker.
        failures: u32,
        /// Earliest time a probe will be allowed through.
        retry_at: DateTime<Utc>,
    },

    /// Network/HTTP error from reqwest.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream API rejected the call with an HTTP status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the upstream response body.
        message: String,
    },

    /// GraphQL query was rejected before dispatch (malformed or over budget).
    #[error("invalid GraphQL query: {message}")]
    InvalidQuery {
        /// Why the query was rejected.
        message: String,
    },

    /// The governor's queue was dropped while this request waited in it.
    #[error("request queue closed before dispatch")]
    QueueClosed,

    /// Configuration file error.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl PacerError {
    /// Whether the retry wrapper is allowed to re-attempt after this error.
    ///
    /// Provider-reported rate limits and transient network failures are
    /// retryable; circuit-open errors are not (the breaker is the backoff),
    /// and neither are validation or configuration failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            PacerError::RateLimited { .. } => true,
            PacerError::Network(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                e.status()
                    .is_some_and(|s| is_retryable_status(s.as_u16()))
            }
            PacerError::Api { status, .. } => is_retryable_status(*status),
            PacerError::CircuitOpen { .. }
            | PacerError::InvalidQuery { .. }
            | PacerError::QueueClosed
            | PacerError::Config { .. } => false,
        }
    }

    /// Extract forced quota state if this error carries provider-reported
    /// reset data.
    #[must_use]
    pub fn quota_reset(&self) -> Option<(Resource, DateTime<Utc>)> {
        match self {
            PacerError::RateLimited {
                resource, reset_at, ..
            } => Some((*resource, *reset_at)),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for PacerError {
    fn from(err: config::ConfigError) -> Self {
        PacerError::Config {
            message: err.to_string(),
        }
    }
}

/// Determines if an HTTP status code is retryable.
///
/// Retryable status codes are 429 (rate limited), 403 (GitHub secondary
/// rate limits), and the transient 5xx family (500, 502, 503, 504).
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 403 | 500 | 502 | 503 | 504)
}
