// SPDX-License-Identifier: Apache-2.0

//! Generic operation-keyed response cache.
//!
//! Keys are `{operation}:{canonical parameters}` with null parameters
//! stripped, so callers passing `None` and callers omitting a field share an
//! entry. Expired records are kept until evicted or cleaned up so they can
//! serve as degraded fallbacks when a refresh fetch fails.

use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::PacerError;

use super::lru::LruStore;
use super::{CacheMetrics, CacheRecord, canonical_json};

struct Inner {
    store: LruStore<CacheRecord>,
    metrics: CacheMetrics,
}

/// LRU + TTL cache keyed by operation name and parameters.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: LruStore::new(config.capacity),
                metrics: CacheMetrics::default(),
            }),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
        }
    }

    /// Derive the cache key for an operation and its parameters.
    #[must_use]
    pub fn key(operation: &str, params: &Value) -> String {
        format!("{operation}:{}", canonical_json(params, true))
    }

    /// Look up a cached response, fetching through `fetcher` on miss.
    ///
    /// A fresh record is returned without invoking `fetcher`. On a miss or
    /// an expired record the fetcher runs with the cache lock released; its
    /// result is stored under `ttl` (or the configured default). If the
    /// fetch fails and any record still exists for the key - even one that
    /// just expired - that record is returned instead of the error.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        operation: &str,
        params: &Value,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> Result<Value, PacerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, PacerError>>,
    {
        let key = Self::key(operation, params);
        let now = Utc::now();

        {
            let mut inner = self.inner.lock().await;
            if let Some(record) = inner.store.get(&key)
                && record.is_fresh(now)
            {
                let value = record.value.clone();
                inner.metrics.record_hit(operation);
                debug!(operation, "cache hit");
                return Ok(value);
            }
            inner.metrics.record_miss(operation);
        }

        let started = tokio::time::Instant::now();
        match fetcher().await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                inner.metrics.record_fetch_time(operation, started.elapsed());
                let evicted = inner.store.insert(
                    key,
                    CacheRecord {
                        value: value.clone(),
                        stored_at: Utc::now(),
                        ttl: ttl.unwrap_or(self.default_ttl),
                    },
                );
                if evicted.is_some() {
                    inner.metrics.evictions += 1;
                }
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                if let Some(record) = inner.store.peek(&key) {
                    let value = record.value.clone();
                    inner.metrics.stale_serves += 1;
                    warn!(operation, error = %err, "fetch failed, serving stale record");
                    Ok(value)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Delete every entry whose key matches `pattern`. Returns the count.
    pub async fn invalidate(&self, pattern: &Regex) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = inner.store.retain(|key, _| !pattern.is_match(key));
        debug!(pattern = pattern.as_str(), removed, "cache invalidation");
        removed
    }

    /// Remove every expired entry. Returns the count.
    ///
    /// Intended to be driven by an external scheduler.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.store.retain(|_, record| record.is_fresh(now))
    }

    /// Snapshot of the hit/miss/eviction counters.
    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.lock().await.metrics.clone()
    }

    /// Number of stored entries (fresh and expired).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.store.len()
    }
}
