// SPDX-License-Identifier: Apache-2.0

//! GraphQL-aware response cache.
//!
//! Keys are built from the extracted operation name, a SHA-256 digest of the
//! whitespace-normalized query text, and canonicalized variables, so two
//! differently-formatted copies of the same query share an entry. TTLs are
//! selected per operation from a static table, and mutations invalidate the
//! read queries they affect.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::GraphQlCacheConfig;
use crate::error::PacerError;

use super::lru::LruStore;
use super::{CacheMetrics, CacheRecord, canonical_json};

/// Per-operation TTLs in seconds. Repository shape changes slowly; issue and
/// discussion lists churn.
const OPERATION_TTLS: &[(&str, u64)] = &[
    ("get_repository", 600),
    ("list_repositories", 300),
    ("get_user", 3600),
    ("get_issue", 180),
    ("list_issues", 120),
    ("get_discussion", 300),
    ("list_discussions", 180),
    ("get_pull_request", 120),
    ("list_pull_requests", 120),
    ("search", 60),
];

/// Mutation name to the read-query name prefixes it stales.
const MUTATION_INVALIDATIONS: &[(&str, &[&str])] = &[
    ("createDiscussion", &["list_discussions", "get_discussion"]),
    ("updateDiscussion", &["list_discussions", "get_discussion"]),
    (
        "addDiscussionComment",
        &["get_discussion", "list_discussions"],
    ),
    ("createIssue", &["list_issues", "get_issue", "search"]),
    ("updateIssue", &["list_issues", "get_issue"]),
    ("addComment", &["get_issue", "list_issues"]),
    (
        "createPullRequest",
        &["list_pull_requests", "get_pull_request"],
    ),
    (
        "mergePullRequest",
        &["list_pull_requests", "get_pull_request"],
    ),
];

static OPERATION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:query|mutation|subscription)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("operation name regex")
});

static FIRST_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)").expect("first field regex")
});

/// Extract the operation name from a query or mutation.
///
/// Prefers the explicit operation name (`query ListIssues {...}`); falls
/// back to the first selected field of an anonymous operation.
#[must_use]
pub fn extract_operation_name(query: &str) -> Option<String> {
    if let Some(caps) = OPERATION_NAME_RE.captures(query) {
        return Some(caps[1].to_string());
    }
    FIRST_FIELD_RE
        .captures(query)
        .map(|caps| caps[1].to_string())
}

/// Collapse runs of whitespace so formatting differences do not fragment
/// the cache.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 digest of normalized query text, hex-encoded.
#[must_use]
pub fn query_digest(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached GraphQL response with the content needed for invalidation
/// matching.
#[derive(Debug, Clone)]
struct GraphQlRecord {
    record: CacheRecord,
    operation: Option<String>,
    raw_query: String,
    variables: Value,
}

struct Inner {
    store: LruStore<GraphQlRecord>,
    metrics: CacheMetrics,
}

/// LRU + TTL cache keyed by normalized query digest and variables.
pub struct GraphQlCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
}

impl GraphQlCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &GraphQlCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: LruStore::new(config.capacity),
                metrics: CacheMetrics::default(),
            }),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
        }
    }

    /// Derive the cache key for a query and its variables.
    #[must_use]
    pub fn key(query: &str, variables: &Value) -> String {
        let operation = extract_operation_name(query).unwrap_or_else(|| "unknown".to_string());
        let digest = query_digest(&normalize_query(query));
        format!(
            "gql:{operation}:{digest}:{}",
            canonical_json(variables, false)
        )
    }

    /// Select the TTL for a query: explicit argument, exact operation-name
    /// table match, substring match of table keys against the query text,
    /// then the configured default.
    #[must_use]
    pub fn ttl_for(&self, query: &str, explicit: Option<Duration>) -> Duration {
        if let Some(ttl) = explicit {
            return ttl;
        }
        let operation = extract_operation_name(query);
        if let Some(op) = &operation
            && let Some((_, secs)) = OPERATION_TTLS.iter().find(|(name, _)| *name == op.as_str())
        {
            return Duration::from_secs(*secs);
        }
        if let Some((_, secs)) = OPERATION_TTLS.iter().find(|(name, _)| query.contains(name)) {
            return Duration::from_secs(*secs);
        }
        self.default_ttl
    }

    /// Look up a cached response, fetching through `fetcher` on miss.
    ///
    /// Same discipline as [`super::ResponseCache::get_or_fetch`]: fresh
    /// records short-circuit, the fetcher runs unlocked, and a failed fetch
    /// falls back to any still-present record.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        query: &str,
        variables: &Value,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> Result<Value, PacerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, PacerError>>,
    {
        let key = Self::key(query, variables);
        let operation = extract_operation_name(query).unwrap_or_else(|| "unknown".to_string());
        let now = Utc::now();

        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.store.get(&key)
                && entry.record.is_fresh(now)
            {
                let value = entry.record.value.clone();
                inner.metrics.record_hit(&operation);
                debug!(%operation, "graphql cache hit");
                return Ok(value);
            }
            inner.metrics.record_miss(&operation);
        }

        let ttl = self.ttl_for(query, ttl);
        let started = tokio::time::Instant::now();
        match fetcher().await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                inner
                    .metrics
                    .record_fetch_time(&operation, started.elapsed());
                let evicted = inner.store.insert(
                    key,
                    GraphQlRecord {
                        record: CacheRecord {
                            value: value.clone(),
                            stored_at: Utc::now(),
                            ttl,
                        },
                        operation: extract_operation_name(query),
                        raw_query: query.to_string(),
                        variables: variables.clone(),
                    },
                );
                if evicted.is_some() {
                    inner.metrics.evictions += 1;
                }
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.store.peek(&key) {
                    let value = entry.record.value.clone();
                    inner.metrics.stale_serves += 1;
                    warn!(%operation, error = %err, "graphql fetch failed, serving stale record");
                    Ok(value)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Delete every entry whose key or stored query text matches `pattern`.
    pub async fn invalidate(&self, pattern: &Regex) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = inner
            .store
            .retain(|key, entry| !pattern.is_match(key) && !pattern.is_match(&entry.raw_query));
        debug!(pattern = pattern.as_str(), removed, "graphql cache invalidation");
        removed
    }

    /// Invalidate the read queries affected by a mutation.
    ///
    /// The mutation's operation name selects a static list of affected query
    /// prefixes. An entry is removed when its operation name starts with an
    /// affected prefix, when it targets the `owner/repo` named by the
    /// mutation's variables (matched against the entry's key and stored
    /// variables), or when its stored query text mentions an affected
    /// prefix.
    pub async fn invalidate_for_mutation(&self, mutation: &str, variables: &Value) -> usize {
        let Some(name) = extract_operation_name(mutation) else {
            return 0;
        };
        let Some((_, affected)) = MUTATION_INVALIDATIONS
            .iter()
            .find(|(mutation_name, _)| *mutation_name == name)
        else {
            debug!(mutation = %name, "no invalidation mapping for mutation");
            return 0;
        };

        let repo_slug = repo_slug_from_variables(variables);

        let mut inner = self.inner.lock().await;
        let removed = inner.store.retain(|key, entry| {
            let op_affected = entry
                .operation
                .as_deref()
                .is_some_and(|op| affected.iter().any(|prefix| op.starts_with(prefix)));
            let repo_affected = repo_slug.as_deref().is_some_and(|slug| {
                key.contains(slug)
                    || repo_slug_from_variables(&entry.variables).as_deref() == Some(slug)
            });
            let query_affected = affected
                .iter()
                .any(|prefix| entry.raw_query.contains(prefix));
            !(op_affected || repo_affected || query_affected)
        });
        debug!(mutation = %name, removed, "mutation-driven invalidation");
        removed
    }

    /// Remove every expired entry. Returns the count.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner
            .store
            .retain(|_, entry| entry.record.is_fresh(now))
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

/// Build an `owner/repo` slug from mutation variables, accepting the
/// common `repo` / `name` / `repository` spellings.
fn repo_slug_from_variables(variables: &Value) -> Option<String> {
    let owner = variables.get("owner").and_then(Value::as_str)?;
    let repo = variables
        .get("repo")
        .or_else(|| variables.get("name"))
        .or_else(|| variables.get("repository"))
        .and_then(Value::as_str)?;
    Some(format!("{owner}/{repo}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_cache() -> GraphQlCache {
        GraphQlCache::new(&GraphQlCacheConfig {
            capacity: 16,
            default_ttl_seconds: 45,
        })
    }

    #[test]
    fn extracts_named_operation() {
        assert_eq!(
            extract_operation_name("query ListIssues($owner: String!) { repository { issues } }"),
            Some("ListIssues".to_string())
        );
        assert_eq!(
            extract_operation_name("mutation createDiscussion { createDiscussion { id } }"),
            Some("createDiscussion".to_string())
        );
    }

    #[test]
    fn anonymous_operation_falls_back_to_first_field() {
        assert_eq!(
            extract_operation_name("{ viewer { login } }"),
            Some("viewer".to_string())
        );
        assert_eq!(
            extract_operation_name("query { list_discussions { nodes } }"),
            Some("list_discussions".to_string())
        );
    }

    #[test]
    fn formatting_differences_share_a_key() {
        let compact = "query ListIssues { repository { issues { nodes } } }";
        let spread = "query ListIssues {\n  repository {\n    issues { nodes }\n  }\n}";
        assert_eq!(
            GraphQlCache::key(compact, &json!({"a": 1})),
            GraphQlCache::key(spread, &json!({"a": 1}))
        );
    }

    #[test]
    fn variable_order_does_not_fragment_the_key() {
        let query = "query ListIssues { repository { issues } }";
        assert_eq!(
            GraphQlCache::key(query, &json!({"owner": "a", "repo": "b"})),
            GraphQlCache::key(query, &json!({"repo": "b", "owner": "a"}))
        );
    }

    #[test]
    fn ttl_selection_order() {
        let cache = test_cache();

        // Explicit argument wins.
        assert_eq!(
            cache.ttl_for("query list_issues { x }", Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        // Exact operation-name match.
        assert_eq!(
            cache.ttl_for("query list_issues { repository { issues } }", None),
            Duration::from_secs(120)
        );
        // Substring match against the query text.
        assert_eq!(
            cache.ttl_for("query { get_user_profile: get_user { login } }", None),
            Duration::from_secs(3600)
        );
        // Default.
        assert_eq!(
            cache.ttl_for("query Bespoke { something { odd } }", None),
            Duration::from_secs(45)
        );
    }

    #[tokio::test]
    async fn second_get_is_a_hit() {
        let cache = test_cache();
        let calls = AtomicU32::new(0);
        let query = "query list_issues { repository { issues { nodes } } }";

        for _ in 0..2 {
            cache
                .get_or_fetch(query, &json!({"owner": "a"}), None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"data": 1}))
                })
                .await
                .expect("fetch");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let metrics = cache.metrics().await;
        assert_eq!(metrics.per_operation["list_issues"].hits, 1);
    }

    #[tokio::test]
    async fn stale_record_served_when_refetch_fails() {
        let cache = test_cache();
        let query = "query get_issue { repository { issue { title } } }";

        cache
            .get_or_fetch(query, &json!({}), Some(Duration::ZERO), || async {
                Ok(json!("cached"))
            })
            .await
            .expect("seed");

        let value = cache
            .get_or_fetch(query, &json!({}), Some(Duration::ZERO), || async {
                Err(PacerError::Api {
                    status: 503,
                    message: "down".to_string(),
                })
            })
            .await
            .expect("stale fallback");

        assert_eq!(value, json!("cached"));
    }

    #[tokio::test]
    async fn invalidate_matches_raw_query_text() {
        let cache = test_cache();
        cache
            .get_or_fetch(
                "query Q1 { repository { discussions { nodes } } }",
                &json!({}),
                None,
                || async { Ok(json!(1)) },
            )
            .await
            .expect("seed");
        cache
            .get_or_fetch(
                "query Q2 { viewer { login } }",
                &json!({}),
                None,
                || async { Ok(json!(2)) },
            )
            .await
            .expect("seed");

        let removed = cache
            .invalidate(&Regex::new("discussions").expect("regex"))
            .await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn mutation_invalidates_affected_repo_queries() {
        let cache = test_cache();
        let discussions = "query list_discussions { repository(owner: \"a\", name: \"b\") { discussions { nodes } } }";
        let discussion = "query get_discussion { repository(owner: \"a\", name: \"b\") { discussion(number: 1) { title } } }";
        let unrelated = "query get_user { user(login: \"c\") { login } }";

        for (query, value) in [(discussions, 1), (discussion, 2), (unrelated, 3)] {
            cache
                .get_or_fetch(query, &json!({}), None, || async { Ok(json!(value)) })
                .await
                .expect("seed");
        }

        let removed = cache
            .invalidate_for_mutation(
                "mutation createDiscussion { createDiscussion(input: $input) { discussion { id } } }",
                &json!({"owner": "a", "repo": "b"}),
            )
            .await;

        assert_eq!(removed, 2);
        assert_eq!(cache.len().await, 1);
        // The unrelated query is untouched and still a hit.
        let calls = AtomicU32::new(0);
        cache
            .get_or_fetch(unrelated, &json!({}), None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(0))
            })
            .await
            .expect("hit");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mutation_invalidates_by_stored_variables() {
        let cache = test_cache();
        // Operation name is not in the affected list, but the entry targets
        // the mutated repo through its variables.
        cache
            .get_or_fetch(
                "query RepoReads { repository { discussionCategories { nodes { name } } } }",
                &json!({"owner": "a", "repo": "b"}),
                None,
                || async { Ok(json!(1)) },
            )
            .await
            .expect("seed");
        cache
            .get_or_fetch(
                "query RepoReads { repository { discussionCategories { nodes { name } } } }",
                &json!({"owner": "x", "repo": "y"}),
                None,
                || async { Ok(json!(2)) },
            )
            .await
            .expect("seed");

        let removed = cache
            .invalidate_for_mutation(
                "mutation createDiscussion { createDiscussion { discussion { id } } }",
                &json!({"owner": "a", "repo": "b"}),
            )
            .await;

        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_mutation_invalidates_nothing() {
        let cache = test_cache();
        cache
            .get_or_fetch("query get_issue { x }", &json!({}), None, || async {
                Ok(json!(1))
            })
            .await
            .expect("seed");

        let removed = cache
            .invalidate_for_mutation("mutation renameBranch { x }", &json!({}))
            .await;
        assert_eq!(removed, 0);
        assert_eq!(cache.len().await, 1);
    }
}
