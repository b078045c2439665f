// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! # Pacer Core
//!
//! Resilience and performance layer for GitHub API access. Every outbound
//! call from an AI-assistant gateway routes through this crate, which
//! provides:
//! - Rate-limit governance over three quota pools (core, search, GraphQL
//!   points) with priority queueing
//! - Static GraphQL query cost estimation
//! - LRU + TTL response caching with mutation-driven invalidation
//! - Per-operation circuit breakers and retry with backoff
//! - Response size limiting for assistant-sized payloads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pacer_core::{
//!     AppConfig, ApiResponse, Priority, ReliabilityManager, RequestContext,
//!     RequestGovernor, Resource,
//! };
//!
//! # async fn example() -> Result<(), pacer_core::PacerError> {
//! let config = AppConfig::default();
//! let governor = Arc::new(RequestGovernor::new(config.governor.clone()));
//! let reliability = ReliabilityManager::new(&config.reliability);
//!
//! let ctx = RequestContext::new();
//! let issues = reliability
//!     .execute("list_issues", &ctx, || {
//!         let governor = Arc::clone(&governor);
//!         async move {
//!             governor
//!                 .execute(Resource::Core, Priority::Normal, || async {
//!                     // The API client collaborator owns the network call.
//!                     Ok(ApiResponse::bare(serde_json::json!([])))
//!                 })
//!                 .await
//!         }
//!     })
//!     .await?;
//! # let _ = issues;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`governor`] - quota pools, priority queue, admission control
//! - [`complexity`] - static GraphQL point estimation
//! - [`cache`] - response and GraphQL caches (LRU + TTL)
//! - [`reliability`] - circuit breakers and retry
//! - [`limiter`] - response size limiting
//! - [`telemetry`] - pluggable observability sink
//! - [`config`] - layered configuration

// ============================================================================
// Error Handling
// ============================================================================

pub use error::PacerError;

/// Convenience Result type for Pacer operations.
///
/// This is equivalent to `std::result::Result<T, PacerError>`.
pub type Result<T> = std::result::Result<T, PacerError>;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    AppConfig, CacheConfig, GovernorConfig, GraphQlCacheConfig, LimiterConfig, ReliabilityConfig,
    config_dir, config_file_path, load_config,
};

// ============================================================================
// Request Governance
// ============================================================================

pub use governor::{
    AdmissionPreview, ApiResponse, GovernorStatus, GraphQlStatus, Priority, QuotaStatus,
    RateLimitSnapshot, RequestGovernor, Resource, ResponseMeta,
};

// ============================================================================
// Query Complexity
// ============================================================================

pub use complexity::{
    ComplexityBreakdown, ComplexityDecision, QueryComplexity, estimate, estimate_points,
    is_complexity_safe,
};

// ============================================================================
// Caching
// ============================================================================

pub use cache::{CacheMetrics, CacheRecord, GraphQlCache, ResponseCache};

// ============================================================================
// Reliability
// ============================================================================

pub use reliability::{
    BackoffKind, CircuitPhase, CircuitSnapshot, ReliabilityManager, RequestContext, RetryPolicy,
};

// ============================================================================
// Response Size Limiting
// ============================================================================

pub use limiter::{LimitedResponse, limit_response};

// ============================================================================
// Telemetry
// ============================================================================

pub use telemetry::{LogTelemetry, NoopTelemetry, Telemetry};

// ============================================================================
// Modules
// ============================================================================

pub mod cache;
pub mod complexity;
pub mod config;
pub mod error;
pub mod governor;
pub mod limiter;
pub mod reliability;
pub mod telemetry;
