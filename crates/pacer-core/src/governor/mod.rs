// SPDX-License-Identifier: Apache-2.0

//! Request admission control.
//!
//! Every outbound API call is enqueued as a [`QueuedRequest`] and dispatched
//! by a single drain task, so quota consumption is fully serialized through
//! one source of truth and no cross-request locking around quota state is
//! needed. Enqueueing is synchronous; the caller's future suspends on a
//! oneshot until its call has been admitted, executed, and settled.
//!
//! The drain task sorts pending work by priority (descending), breaking ties
//! by estimated cost (ascending) so cheap work goes first among equals and
//! head-of-line blocking stays small. Throttle waits are capped and
//! recomputed each iteration, so a far-future reset never stalls the queue
//! for longer than one cap at a time.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::complexity;
use crate::config::GovernorConfig;
use crate::error::PacerError;
use crate::telemetry::{NoopTelemetry, Telemetry};

mod quota;

pub use quota::{PointUsage, QuotaPools, QuotaState, RateLimitSnapshot, Resource};

/// Scheduling priority. Higher dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work; yields to everything else.
    Low,
    /// Default.
    Normal,
    /// User-facing reads.
    High,
    /// Interactive calls that should jump the queue.
    Critical,
}

/// Response metadata the governor reads after a successful call.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    /// Authoritative rate-limit snapshot, when headers carried one.
    pub rate_limit: Option<RateLimitSnapshot>,
    /// Provider-reported GraphQL cost, when the response carried one.
    pub graphql_cost: Option<u32>,
}

impl ResponseMeta {
    /// Build metadata from response headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            rate_limit: RateLimitSnapshot::from_headers(headers),
            graphql_cost: None,
        }
    }
}

/// A successful upstream response: the payload plus governor-facing
/// metadata.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// The payload, handed back to the caller untouched.
    pub data: T,
    /// Metadata consumed by the governor.
    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    /// A response with no metadata (e.g. from a collaborator that does not
    /// expose headers).
    pub fn bare(data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta::default(),
        }
    }
}

/// What the drain task learns from a settled call.
enum DispatchOutcome {
    Success(ResponseMeta),
    Failure(Option<(Resource, DateTime<Utc>)>),
}

/// A call waiting for admission. Owned by the governor until settled.
struct QueuedRequest {
    priority: Priority,
    estimated_cost: u32,
    resource: Resource,
    seq: u64,
    query_digest: Option<String>,
    invoke: BoxFuture<'static, DispatchOutcome>,
}

/// Why admission is being delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum ThrottleReason {
    PointsExceedRemaining,
    HourlyBudgetBuffer,
    PoolExhausted,
    MinSpacing,
}

/// Admission decision for the request at the head of the queue.
enum ThrottleDecision {
    Proceed,
    Wait {
        duration: Duration,
        reason: ThrottleReason,
    },
}

/// Read-only view of one pool for monitoring callers.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Pool name.
    pub resource: Resource,
    /// Total budget for the current window.
    pub limit: u32,
    /// Remaining budget.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

impl From<&QuotaState> for QuotaStatus {
    fn from(state: &QuotaState) -> Self {
        Self {
            resource: state.resource,
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
        }
    }
}

/// Read-only governor status.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStatus {
    /// Core pool.
    pub core: QuotaStatus,
    /// Search pool.
    pub search: QuotaStatus,
    /// GraphQL pool.
    pub graphql: QuotaStatus,
    /// Requests waiting for admission.
    pub queue_depth: usize,
}

/// Read-only GraphQL budget status.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlStatus {
    /// GraphQL pool state.
    pub pool: QuotaStatus,
    /// Points spent in the trailing hour.
    pub points_last_hour: u32,
    /// Entries in the spend window.
    pub window_entries: usize,
}

/// Admission preview for a query, without mutating any state.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionPreview {
    /// Whether the query would be admitted right now.
    pub allowed: bool,
    /// Estimated point cost.
    pub estimated_points: u32,
    /// How long the query would wait, when not allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
}

/// Admission controller for all outbound API calls.
pub struct RequestGovernor {
    config: GovernorConfig,
    queue: StdMutex<Vec<QueuedRequest>>,
    draining: AtomicBool,
    pools: Mutex<QuotaPools>,
    last_dispatch: StdMutex<Option<tokio::time::Instant>>,
    seq: AtomicU64,
    telemetry: Arc<dyn Telemetry>,
}

impl RequestGovernor {
    /// Create a governor with the given configuration and a no-op telemetry
    /// sink.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_telemetry(config, Arc::new(NoopTelemetry))
    }

    /// Create a governor reporting to `telemetry`.
    #[must_use]
    pub fn with_telemetry(config: GovernorConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            config,
            queue: StdMutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            pools: Mutex::new(QuotaPools::new()),
            last_dispatch: StdMutex::new(None),
            seq: AtomicU64::new(0),
            telemetry,
        }
    }

    /// Route a plain request through admission control.
    ///
    /// Resolves or rejects with whatever `call` produces, but only after
    /// the governor has admitted the request against `resource`'s budget.
    pub async fn execute<T, F, Fut>(
        self: &Arc<Self>,
        resource: Resource,
        priority: Priority,
        call: F,
    ) -> Result<T, PacerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ApiResponse<T>, PacerError>> + Send + 'static,
    {
        self.submit(resource, priority, 1, None, call).await
    }

    /// Route a GraphQL request through admission control.
    ///
    /// The query's point cost is estimated up front and charged against the
    /// `graphql` pool; estimator warnings are logged but do not block.
    pub async fn execute_graphql<T, F, Fut>(
        self: &Arc<Self>,
        query: &str,
        variables: &Map<String, Value>,
        priority: Priority,
        call: F,
    ) -> Result<T, PacerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ApiResponse<T>, PacerError>> + Send + 'static,
    {
        let estimate = complexity::estimate(query, variables);
        for warning in &estimate.warnings {
            warn!(%warning, "query complexity warning");
        }
        let digest = crate::cache::query_digest(&crate::cache::normalize_query(query));
        self.submit(
            Resource::Graphql,
            priority,
            estimate.estimated_points,
            Some(digest),
            call,
        )
        .await
    }

    async fn submit<T, F, Fut>(
        self: &Arc<Self>,
        resource: Resource,
        priority: Priority,
        estimated_cost: u32,
        query_digest: Option<String>,
        call: F,
    ) -> Result<T, PacerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ApiResponse<T>, PacerError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T, PacerError>>();
        let invoke = async move {
            match call().await {
                Ok(response) => {
                    let meta = response.meta.clone();
                    let _ = tx.send(Ok(response.data));
                    DispatchOutcome::Success(meta)
                }
                Err(err) => {
                    let reset = err.quota_reset();
                    let _ = tx.send(Err(err));
                    DispatchOutcome::Failure(reset)
                }
            }
        }
        .boxed();

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock().expect("queue lock");
            queue.push(QueuedRequest {
                priority,
                estimated_cost,
                resource,
                seq,
                query_digest,
                invoke,
            });
        }
        debug!(%resource, ?priority, estimated_cost, "request enqueued");
        self.spawn_drain();

        rx.await.map_err(|_| PacerError::QueueClosed)?
    }

    /// Start the drain task unless one is already running.
    fn spawn_drain(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            governor.drain().await;
        });
    }

    async fn drain(self: Arc<Self>) {
        while let Some(request) = self.pop_next() {
            loop {
                match self
                    .throttle_decision(request.resource, request.estimated_cost)
                    .await
                {
                    ThrottleDecision::Proceed => break,
                    ThrottleDecision::Wait { duration, reason } => {
                        let capped = duration.min(Duration::from_millis(self.config.max_wait_ms));
                        debug!(
                            resource = %request.resource,
                            ?reason,
                            wait_ms = capped.as_millis() as u64,
                            "throttling"
                        );
                        self.telemetry
                            .track_metric("governor.throttle_wait_ms", capped.as_millis() as f64);
                        tokio::time::sleep(capped).await;
                    }
                }
            }

            let resource = request.resource;
            let estimated_cost = request.estimated_cost;
            let query_digest = request.query_digest;
            let outcome = request.invoke.await;
            self.apply_outcome(resource, estimated_cost, query_digest, outcome)
                .await;
            *self.last_dispatch.lock().expect("spacing lock") = Some(tokio::time::Instant::now());
        }

        self.draining.store(false, Ordering::SeqCst);
        // An enqueue may have raced the shutdown of this drain task.
        let pending = !self.queue.lock().expect("queue lock").is_empty();
        if pending {
            self.spawn_drain();
        }
    }

    /// Pop the next request: highest priority first, cheapest first among
    /// equals, then submission order.
    fn pop_next(&self) -> Option<QueuedRequest> {
        let mut queue = self.queue.lock().expect("queue lock");
        if queue.is_empty() {
            return None;
        }
        queue.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.estimated_cost.cmp(&b.estimated_cost))
                .then(a.seq.cmp(&b.seq))
        });
        Some(queue.remove(0))
    }

    /// Throttle rules, first match wins. Read-only on quota state.
    async fn throttle_decision(&self, resource: Resource, estimated_cost: u32) -> ThrottleDecision {
        let now = Utc::now();
        let pools = self.pools.lock().await;
        let state = pools.state(resource);
        let until_reset = || {
            (state.reset_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
        };

        if resource == Resource::Graphql {
            if estimated_cost > state.remaining {
                let wait = until_reset();
                if !wait.is_zero() {
                    return ThrottleDecision::Wait {
                        duration: wait,
                        reason: ThrottleReason::PointsExceedRemaining,
                    };
                }
            }

            // Safety buffer against provider-side accounting surprises.
            let buffer = 100.max(state.limit / 10);
            let budget = state.limit.saturating_sub(buffer);
            if pools.points_last_hour(now) + estimated_cost > budget {
                let wait = until_reset();
                if !wait.is_zero() {
                    return ThrottleDecision::Wait {
                        duration: wait,
                        reason: ThrottleReason::HourlyBudgetBuffer,
                    };
                }
            }
        }

        if state.remaining <= self.config.low_remaining_threshold {
            let wait = until_reset();
            if !wait.is_zero() {
                return ThrottleDecision::Wait {
                    duration: wait,
                    reason: ThrottleReason::PoolExhausted,
                };
            }
        }

        let min_spacing = Duration::from_millis(self.config.min_spacing_ms);
        if let Some(last) = *self.last_dispatch.lock().expect("spacing lock") {
            let since = last.elapsed();
            if since < min_spacing {
                return ThrottleDecision::Wait {
                    duration: min_spacing - since,
                    reason: ThrottleReason::MinSpacing,
                };
            }
        }

        ThrottleDecision::Proceed
    }

    /// Fold a settled call's outcome into quota state. Runs strictly after
    /// the call, never speculatively.
    async fn apply_outcome(
        &self,
        resource: Resource,
        estimated_cost: u32,
        query_digest: Option<String>,
        outcome: DispatchOutcome,
    ) {
        let mut pools = self.pools.lock().await;
        match outcome {
            DispatchOutcome::Success(meta) => {
                if let Some(snapshot) = meta.rate_limit {
                    debug!(%resource, remaining = snapshot.remaining, "quota refreshed from headers");
                    pools.apply_snapshot(resource, snapshot);
                }
                if resource == Resource::Graphql {
                    let points = meta.graphql_cost.unwrap_or(estimated_cost);
                    pools.record_points(points, query_digest.unwrap_or_default(), Utc::now());
                }
            }
            DispatchOutcome::Failure(Some((failed_resource, reset_at))) => {
                warn!(resource = %failed_resource, %reset_at, "provider reported quota exhaustion");
                pools.force_exhausted(failed_resource, reset_at);
            }
            DispatchOutcome::Failure(None) => {}
        }
    }

    /// Externally refresh a pool (e.g. from a dedicated rate-limit
    /// endpoint).
    pub async fn refresh_quota(&self, resource: Resource, snapshot: RateLimitSnapshot) {
        self.pools.lock().await.apply_snapshot(resource, snapshot);
    }

    /// Read-only status of all pools and the queue.
    pub async fn status(&self) -> GovernorStatus {
        let pools = self.pools.lock().await;
        GovernorStatus {
            core: pools.state(Resource::Core).into(),
            search: pools.state(Resource::Search).into(),
            graphql: pools.state(Resource::Graphql).into(),
            queue_depth: self.queue.lock().expect("queue lock").len(),
        }
    }

    /// Read-only GraphQL budget status.
    pub async fn graphql_status(&self) -> GraphQlStatus {
        let pools = self.pools.lock().await;
        GraphQlStatus {
            pool: pools.state(Resource::Graphql).into(),
            points_last_hour: pools.points_last_hour(Utc::now()),
            window_entries: pools.window_len(),
        }
    }

    /// Preview whether a query would be admitted right now. Must not mutate
    /// any state.
    pub async fn can_execute_graphql(
        &self,
        query: &str,
        variables: &Map<String, Value>,
    ) -> AdmissionPreview {
        let estimated_points = complexity::estimate_points(query, variables);
        match self
            .throttle_decision(Resource::Graphql, estimated_points)
            .await
        {
            ThrottleDecision::Proceed => AdmissionPreview {
                allowed: true,
                estimated_points,
                wait_ms: None,
            },
            ThrottleDecision::Wait { duration, .. } => AdmissionPreview {
                allowed: false,
                estimated_points,
                wait_ms: Some(duration.as_millis() as u64),
            },
        }
    }
}
