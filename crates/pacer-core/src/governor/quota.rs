// SPDX-License-Identifier: Apache-2.0

//! Quota pool state for the request governor.
//!
//! Three pools are metered independently: `core` and `search` count
//! requests, `graphql` counts cost points. Pool state is only ever set from
//! authoritative sources - response headers or provider-reported limit
//! errors - never decremented speculatively. The GraphQL pool additionally
//! keeps a sliding window of recent point spend; the hourly sum used for
//! throttling is recomputed from the window on every read.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;

/// Quota pool a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Plain REST requests.
    Core,
    /// Search API requests (separately, and much more tightly, metered).
    Search,
    /// GraphQL point budget.
    Graphql,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::Core => "core",
            Resource::Search => "search",
            Resource::Graphql => "graphql",
        };
        f.write_str(name)
    }
}

/// Authoritative rate-limit data parsed from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// Total budget for the current window.
    pub limit: u32,
    /// Remaining budget.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Parse the standard `x-ratelimit-*` headers.
    ///
    /// Returns `None` unless all three of limit, remaining, and reset are
    /// present and well-formed; a partial snapshot must not overwrite
    /// authoritative state.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let limit = parse_header(headers, "x-ratelimit-limit")?;
        let remaining = parse_header(headers, "x-ratelimit-remaining")?;
        let reset_epoch: i64 = parse_header(headers, "x-ratelimit-reset")?;
        let reset_at = DateTime::<Utc>::from_timestamp(reset_epoch, 0)?;
        Some(Self {
            limit,
            remaining,
            reset_at,
        })
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// State of one quota pool.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaState {
    /// Pool this state tracks.
    pub resource: Resource,
    /// Total budget for the current window.
    pub limit: u32,
    /// Remaining budget, from the last authoritative report.
    pub remaining: u32,
    /// When the current window resets.
    pub reset_at: DateTime<Utc>,
}

impl QuotaState {
    fn new(resource: Resource, limit: u32, window: Duration) -> Self {
        Self {
            resource,
            limit,
            remaining: limit,
            reset_at: Utc::now() + window,
        }
    }

    /// Overwrite from an authoritative header snapshot.
    pub fn apply_snapshot(&mut self, snapshot: RateLimitSnapshot) {
        self.limit = snapshot.limit;
        self.remaining = snapshot.remaining;
        self.reset_at = snapshot.reset_at;
    }

    /// Force exhaustion after a provider-reported limit error, so the next
    /// admission check blocks instead of re-attempting.
    pub fn force_exhausted(&mut self, reset_at: DateTime<Utc>) {
        self.remaining = 0;
        self.reset_at = reset_at;
    }
}

/// One recorded GraphQL spend.
#[derive(Debug, Clone, Serialize)]
pub struct PointUsage {
    /// When the query executed.
    pub at: DateTime<Utc>,
    /// Points charged (provider-reported when available, estimated
    /// otherwise).
    pub points: u32,
    /// Digest of the normalized query, for attribution.
    pub query_digest: String,
}

/// All three pools plus the GraphQL spend window.
#[derive(Debug)]
pub struct QuotaPools {
    core: QuotaState,
    search: QuotaState,
    graphql: QuotaState,
    window: Vec<PointUsage>,
}

impl QuotaPools {
    /// GitHub-shaped defaults: 5000 core requests/hour, 30 search
    /// requests/minute, 5000 GraphQL points/hour.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: QuotaState::new(Resource::Core, 5_000, Duration::hours(1)),
            search: QuotaState::new(Resource::Search, 30, Duration::minutes(1)),
            graphql: QuotaState::new(Resource::Graphql, 5_000, Duration::hours(1)),
            window: Vec::new(),
        }
    }

    /// Read a pool's state.
    #[must_use]
    pub fn state(&self, resource: Resource) -> &QuotaState {
        match resource {
            Resource::Core => &self.core,
            Resource::Search => &self.search,
            Resource::Graphql => &self.graphql,
        }
    }

    fn state_mut(&mut self, resource: Resource) -> &mut QuotaState {
        match resource {
            Resource::Core => &mut self.core,
            Resource::Search => &mut self.search,
            Resource::Graphql => &mut self.graphql,
        }
    }

    /// Apply an authoritative header snapshot to a pool.
    pub fn apply_snapshot(&mut self, resource: Resource, snapshot: RateLimitSnapshot) {
        self.state_mut(resource).apply_snapshot(snapshot);
    }

    /// Force a pool into the exhausted state.
    pub fn force_exhausted(&mut self, resource: Resource, reset_at: DateTime<Utc>) {
        self.state_mut(resource).force_exhausted(reset_at);
    }

    /// Record GraphQL spend and prune the window to the trailing hour.
    pub fn record_points(&mut self, points: u32, query_digest: String, now: DateTime<Utc>) {
        self.window.push(PointUsage {
            at: now,
            points,
            query_digest,
        });
        let cutoff = now - Duration::hours(1);
        self.window.retain(|usage| usage.at > cutoff);
    }

    /// Points spent in the trailing hour, recomputed from the window.
    #[must_use]
    pub fn points_last_hour(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - Duration::hours(1);
        self.window
            .iter()
            .filter(|usage| usage.at > cutoff)
            .map(|usage| usage.points)
            .sum()
    }

    /// Number of entries currently in the spend window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

impl Default for QuotaPools {
    fn default() -> Self {
        Self::new()
    }
}
