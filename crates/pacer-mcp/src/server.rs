// SPDX-License-Identifier: Apache-2.0

//! MCP server exposing the gateway's introspection surface.
//!
//! Every tool here is read-only against quota state except
//! `invalidate_cache`, which only touches local cache entries. The actual
//! GitHub tools live in the host gateway; this server lets an assistant (or
//! an operator) watch budgets, preview query costs, and inspect breaker
//! state.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{generic_to_mcp_error, pacer_error_to_mcp};
use pacer_core::{
    AppConfig, GraphQlCache, PacerError, ReliabilityManager, RequestGovernor, ResponseCache,
};

// ---------------------------------------------------------------------------
// Tool parameter structs
// ---------------------------------------------------------------------------

/// Parameters for estimating a GraphQL query's point cost.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(description = "Estimate the point cost of a GraphQL query before sending it")]
pub struct EstimateQueryCostParams {
    /// GraphQL query text.
    #[schemars(description = "GraphQL query text")]
    pub query: String,
    /// Query variables as a JSON object.
    #[schemars(description = "Query variables as a JSON object")]
    pub variables: Option<Value>,
}

/// Parameters for previewing admission of a GraphQL query.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(description = "Check whether a GraphQL query would be admitted under current quota")]
pub struct CheckQueryAdmissionParams {
    /// GraphQL query text.
    #[schemars(description = "GraphQL query text")]
    pub query: String,
    /// Query variables as a JSON object.
    #[schemars(description = "Query variables as a JSON object")]
    pub variables: Option<Value>,
}

/// Parameters for cache invalidation.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(description = "Invalidate cached responses matching a regular expression")]
pub struct InvalidateCacheParams {
    /// Regular expression matched against cache keys and stored query text.
    #[schemars(description = "Regular expression matched against cache keys and query text")]
    pub pattern: String,
}

/// Parameters for status tools (empty for consistency).
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(description = "No parameters")]
pub struct StatusParams {}

// ---------------------------------------------------------------------------
// Server struct
// ---------------------------------------------------------------------------

/// MCP server exposing pacer-core introspection.
#[derive(Clone)]
pub struct PacerServer {
    governor: Arc<RequestGovernor>,
    response_cache: Arc<ResponseCache>,
    graphql_cache: Arc<GraphQlCache>,
    reliability: Arc<ReliabilityManager>,
    tool_router: ToolRouter<Self>,
}

fn variables_map(variables: Option<Value>) -> serde_json::Map<String, Value> {
    variables
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(generic_to_mcp_error)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

// ---------------------------------------------------------------------------
// Tools (generates Self::tool_router())
// ---------------------------------------------------------------------------

#[tool_router]
impl PacerServer {
    /// Create a server with freshly constructed gateway state.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            governor: Arc::new(RequestGovernor::new(config.governor.clone())),
            response_cache: Arc::new(ResponseCache::new(&config.cache)),
            graphql_cache: Arc::new(GraphQlCache::new(&config.graphql_cache)),
            reliability: Arc::new(ReliabilityManager::new(&config.reliability)),
            tool_router: Self::tool_router(),
        }
    }

    /// Create a server sharing gateway state with a host.
    #[must_use]
    pub fn with_state(
        governor: Arc<RequestGovernor>,
        response_cache: Arc<ResponseCache>,
        graphql_cache: Arc<GraphQlCache>,
        reliability: Arc<ReliabilityManager>,
    ) -> Self {
        Self {
            governor,
            response_cache,
            graphql_cache,
            reliability,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "rate_limit_status",
        description = "Current quota state for the core, search, and GraphQL pools",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn rate_limit_status(
        &self,
        Parameters(_params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self.governor.status().await;
        json_result(&status)
    }

    #[tool(
        name = "graphql_budget_status",
        description = "GraphQL point budget: pool state and trailing-hour spend",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn graphql_budget_status(
        &self,
        Parameters(_params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self.governor.graphql_status().await;
        json_result(&status)
    }

    #[tool(
        name = "estimate_query_cost",
        description = "Estimate a GraphQL query's point cost with a breakdown and warnings",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn estimate_query_cost(
        &self,
        Parameters(params): Parameters<EstimateQueryCostParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.query.trim().is_empty() {
            return Err(pacer_error_to_mcp(&PacerError::InvalidQuery {
                message: "query text is empty".to_string(),
            }));
        }
        let variables = variables_map(params.variables);
        let complexity = pacer_core::estimate(&params.query, &variables);
        json_result(&complexity)
    }

    #[tool(
        name = "check_query_admission",
        description = "Preview whether a GraphQL query would be admitted under current quota",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn check_query_admission(
        &self,
        Parameters(params): Parameters<CheckQueryAdmissionParams>,
    ) -> Result<CallToolResult, McpError> {
        let variables = variables_map(params.variables);
        let preview = self
            .governor
            .can_execute_graphql(&params.query, &variables)
            .await;
        json_result(&preview)
    }

    #[tool(
        name = "cache_stats",
        description = "Hit/miss/eviction counters for both caches, overall and per operation",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn cache_stats(
        &self,
        Parameters(_params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let stats = serde_json::json!({
            "response_cache": {
                "entries": self.response_cache.len().await,
                "metrics": self.response_cache.metrics().await,
            },
            "graphql_cache": {
                "entries": self.graphql_cache.len().await,
                "metrics": self.graphql_cache.metrics().await,
            },
        });
        json_result(&stats)
    }

    #[tool(
        name = "invalidate_cache",
        description = "Delete cached responses whose key or query text matches a pattern",
        annotations(idempotent_hint = true)
    )]
    async fn invalidate_cache(
        &self,
        Parameters(params): Parameters<InvalidateCacheParams>,
    ) -> Result<CallToolResult, McpError> {
        let pattern = regex::Regex::new(&params.pattern).map_err(generic_to_mcp_error)?;
        let removed = self.response_cache.invalidate(&pattern).await
            + self.graphql_cache.invalidate(&pattern).await;
        json_result(&serde_json::json!({ "removed": removed }))
    }

    #[tool(
        name = "circuit_status",
        description = "State of every per-operation circuit breaker",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn circuit_status(
        &self,
        Parameters(_params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let snapshots = self.reliability.circuit_snapshots().await;
        json_result(&snapshots)
    }

    #[tool(
        name = "health",
        description = "Gateway liveness: queue depth and pool summaries",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn health(
        &self,
        Parameters(_params): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self.governor.status().await;
        let health = serde_json::json!({
            "ok": true,
            "queue_depth": status.queue_depth,
            "core_remaining": status.core.remaining,
            "graphql_remaining": status.graphql.remaining,
        });
        json_result(&health)
    }
}

// ---------------------------------------------------------------------------
// ServerHandler
// ---------------------------------------------------------------------------

#[tool_handler]
impl ServerHandler for PacerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_protocol_version(ProtocolVersion::V_2024_11_05)
            .with_instructions(
                "Pacer MCP server for GitHub API gateway introspection. \
                 Tools: rate_limit_status, graphql_budget_status, estimate_query_cost, \
                 check_query_admission, cache_stats, invalidate_cache, circuit_status, health.",
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> PacerServer {
        PacerServer::new(&AppConfig::default())
    }

    #[tokio::test]
    async fn rate_limit_status_succeeds() {
        let result = server().rate_limit_status(Parameters(StatusParams {})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn graphql_budget_status_succeeds() {
        let result = server()
            .graphql_budget_status(Parameters(StatusParams {}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn estimate_rejects_empty_query() {
        let result = server()
            .estimate_query_cost(Parameters(EstimateQueryCostParams {
                query: "   ".to_string(),
                variables: None,
            }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn estimate_accepts_query_with_variables() {
        let result = server()
            .estimate_query_cost(Parameters(EstimateQueryCostParams {
                query: "query($n: Int!) { repository { issues(first: $n) { nodes { title } } } }"
                    .to_string(),
                variables: Some(serde_json::json!({"n": 50})),
            }))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn invalidate_rejects_bad_pattern() {
        let result = server()
            .invalidate_cache(Parameters(InvalidateCacheParams {
                pattern: "(unclosed".to_string(),
            }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalidate_on_empty_caches_removes_nothing() {
        let result = server()
            .invalidate_cache(Parameters(InvalidateCacheParams {
                pattern: "issues".to_string(),
            }))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn circuit_status_starts_empty() {
        let result = server().circuit_status(Parameters(StatusParams {})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn health_succeeds() {
        let result = server().health(Parameters(StatusParams {})).await;
        assert!(result.is_ok());
    }

    #[test]
    fn variables_map_handles_non_objects() {
        assert!(variables_map(None).is_empty());
        assert!(variables_map(Some(serde_json::json!("not an object"))).is_empty());
        let map = variables_map(Some(serde_json::json!({"n": 5})));
        assert_eq!(map["n"], serde_json::json!(5));
    }
}
