// SPDX-License-Identifier: Apache-2.0

//! Configuration management for the Pacer gateway.
//!
//! Provides layered configuration from files and environment variables.
//! Uses XDG-compliant paths with environment variable support.
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables (prefix: `PACER_`)
//! 2. Config file: `~/.config/pacer/config.toml`
//! 3. Built-in defaults
//!
//! # Examples
//!
//! ```bash
//! # Override the governor's minimum request spacing via environment variable
//! PACER_GOVERNOR__MIN_SPACING_MS=250 pacer-mcp
//! ```

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::PacerError;

/// Application configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Request governor settings.
    pub governor: GovernorConfig,
    /// Generic response cache settings.
    pub cache: CacheConfig,
    /// GraphQL cache settings.
    pub graphql_cache: GraphQlCacheConfig,
    /// Circuit breaker and retry settings.
    pub reliability: ReliabilityConfig,
    /// Response size limiter settings.
    pub limiter: LimiterConfig,
}

/// Request governor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Minimum spacing between dequeues in milliseconds.
    pub min_spacing_ms: u64,
    /// Cap on a single cooperative throttle sleep in milliseconds.
    pub max_wait_ms: u64,
    /// Pool is considered exhausted at or below this remaining count.
    pub low_remaining_threshold: u32,
    /// Single-query point budget considered safe without a warning.
    pub safe_query_points: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 100,
            max_wait_ms: 5_000,
            low_remaining_threshold: 10,
            safe_query_points: 100,
        }
    }
}

/// Generic response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub capacity: usize,
    /// Default TTL in seconds for entries stored without an explicit TTL.
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            default_ttl_seconds: 300,
        }
    }
}

/// GraphQL cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphQlCacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub capacity: usize,
    /// Default TTL in seconds when no per-operation TTL matches.
    pub default_ttl_seconds: u64,
}

impl Default for GraphQlCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            default_ttl_seconds: 120,
        }
    }
}

/// Circuit breaker and retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Consecutive failures before a breaker opens (default: 5).
    pub circuit_breaker_threshold: u32,
    /// Seconds an open breaker waits before allowing a probe (default: 60).
    pub circuit_breaker_reset_seconds: u64,
    /// Maximum retry attempts including the first call (default: 3).
    pub retry_max_attempts: u32,
    /// Base retry delay in milliseconds (default: 1000).
    pub retry_base_delay_ms: u64,
    /// Retry delay ceiling in milliseconds (default: 30000).
    pub retry_max_delay_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_seconds: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Response size limiter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum serialized payload size in bytes.
    pub max_bytes: usize,
    /// Maximum number of array items returned.
    pub max_items: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_items: 1_000,
        }
    }
}

/// Returns the configuration directory.
///
/// - Linux: `~/.config/pacer`
/// - macOS: `~/Library/Application Support/pacer`
/// - Windows: `C:\Users\<User>\AppData\Roaming\pacer`
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .expect("Failed to determine config directory")
        .join("pacer")
}

/// Returns the path to the configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from file and environment.
///
/// Missing files are fine; defaults apply. Environment variables use the
/// `PACER_` prefix with `__` as the section separator.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed, or if an
/// environment override has the wrong shape.
pub fn load_config() -> Result<AppConfig, PacerError> {
    let builder = Config::builder()
        .add_source(File::from(config_file_path()).required(false))
        .add_source(Environment::with_prefix("PACER").separator("__"));

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}
