// SPDX-License-Identifier: Apache-2.0

//! Response caching for upstream API calls.
//!
//! Two parameterizations of one discipline share an O(1) LRU core:
//! [`ResponseCache`] keys entries by operation name plus canonicalized
//! parameters, and [`GraphQlCache`] keys them by a digest of the normalized
//! query text plus canonicalized variables, with per-operation TTLs and
//! mutation-driven invalidation.
//!
//! Both caches fetch through a caller-supplied async closure with their lock
//! released, so a slow upstream never blocks unrelated cache traffic. There
//! is deliberately no request deduplication here; two concurrent misses for
//! one key issue two fetches.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

mod graphql;
mod lru;
mod response;

pub use graphql::{GraphQlCache, extract_operation_name, normalize_query, query_digest};
pub use lru::LruStore;
pub use response::ResponseCache;

/// A cached response with expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    /// The cached payload.
    pub value: Value,
    /// When the entry was stored.
    pub stored_at: DateTime<Utc>,
    /// How long the entry stays fresh.
    pub ttl: Duration,
}

impl CacheRecord {
    /// Whether the record is still within its TTL at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.ttl)
            .is_ok_and(|ttl| now.signed_duration_since(self.stored_at) < ttl)
    }
}

/// Hit/miss/eviction counters, overall and per operation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheMetrics {
    /// Fresh records served.
    pub hits: u64,
    /// Fetches caused by absent or expired records.
    pub misses: u64,
    /// Records displaced by LRU capacity pressure.
    pub evictions: u64,
    /// Expired records served because the refresh fetch failed.
    pub stale_serves: u64,
    /// Per-operation counters and fetch timing.
    pub per_operation: HashMap<String, OperationMetrics>,
}

/// Counters for one operation name.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OperationMetrics {
    /// Fresh records served.
    pub hits: u64,
    /// Fetches caused by absent or expired records.
    pub misses: u64,
    /// Rolling average upstream fetch time in milliseconds.
    pub avg_fetch_ms: f64,
    /// Number of fetches folded into the average.
    pub fetch_samples: u64,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&mut self, operation: &str) {
        self.hits += 1;
        self.per_operation.entry(operation.to_string()).or_default().hits += 1;
    }

    pub(crate) fn record_miss(&mut self, operation: &str) {
        self.misses += 1;
        self.per_operation
            .entry(operation.to_string())
            .or_default()
            .misses += 1;
    }

    pub(crate) fn record_fetch_time(&mut self, operation: &str, duration: Duration) {
        let entry = self.per_operation.entry(operation.to_string()).or_default();
        entry.fetch_samples += 1;
        #[allow(clippy::cast_precision_loss)]
        let sample = duration.as_secs_f64() * 1_000.0;
        entry.avg_fetch_ms += (sample - entry.avg_fetch_ms) / entry.fetch_samples as f64;
    }
}

/// Canonical JSON for cache keys: object keys recursively sorted, and
/// (optionally) null members stripped so absent and null parameters
/// produce the same key.
#[must_use]
pub fn canonical_json(value: &Value, strip_nulls: bool) -> String {
    fn canonicalize(value: &Value, strip_nulls: bool, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .iter()
                    .filter(|(_, v)| !(strip_nulls && v.is_null()))
                    .map(|(k, _)| k)
                    .collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).unwrap_or_default());
                    out.push(':');
                    canonicalize(&map[key.as_str()], strip_nulls, out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    canonicalize(item, strip_nulls, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    canonicalize(value, strip_nulls, &mut out);
    out
}
