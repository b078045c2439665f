// SPDX-License-Identifier: Apache-2.0

//! Static GraphQL query cost estimation.
//!
//! Approximates the point cost a query will be charged before it is sent,
//! so the governor can budget against the points pool. The analysis is
//! purely textual (no execution): it counts selected fields, detects
//! connection-style fields by their pagination arguments, and amplifies the
//! cost of connections nested inside other connections, because the outer
//! page size multiplies the inner one.
//!
//! The formula is a tunable monotonic heuristic, not a replication of any
//! provider's accounting. The only contracts are monotonicity in page size
//! and nesting, and stability for identical input.

use serde_json::{Map, Value};

/// One point is charged per this many plain selected fields.
const FIELDS_PER_POINT: u32 = 10;

/// A connection's point cost is its requested page size divided by this.
const CONNECTION_PAGE_DIVISOR: u32 = 10;

/// Cost multiplier applied per level of connection nesting.
const NESTED_CONNECTION_MULTIPLIER: u32 = 5;

/// Page size assumed when a pagination argument cannot be resolved.
const DEFAULT_PAGE_SIZE: u32 = 30;

/// Page sizes above this trigger a warning.
const PAGE_SIZE_WARNING_THRESHOLD: u32 = 50;

/// Default "safe" single-query budget used by [`is_complexity_safe`].
pub const DEFAULT_SAFE_POINTS: u32 = 100;

/// GraphQL keywords that are never counted as selected fields.
const KEYWORDS: &[&str] = &[
    "query",
    "mutation",
    "subscription",
    "fragment",
    "on",
    "true",
    "false",
    "null",
];

/// Breakdown of what drove a query's estimated cost.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ComplexityBreakdown {
    /// Number of selected fields counted.
    pub total_fields: u32,
    /// Number of connection-style fields (pagination arguments present).
    pub connections: u32,
    /// Number of connections nested inside another connection.
    pub nested_queries: u32,
}

/// Result of statically analyzing a query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryComplexity {
    /// Approximate point cost.
    pub estimated_points: u32,
    /// What drove the estimate.
    pub breakdown: ComplexityBreakdown,
    /// Human-readable warnings (over budget, oversized pages).
    pub warnings: Vec<String>,
}

/// Safety decision with the estimate attached.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ComplexityDecision {
    /// Whether the estimate is at or under the threshold.
    pub safe: bool,
    /// The estimate the decision was made on.
    pub estimated_points: u32,
}

/// Estimate the point cost of a GraphQL query.
///
/// `variables` resolves `first: $var` / `last: $var` pagination arguments;
/// unresolvable sizes fall back to a default page size.
#[must_use]
pub fn estimate(query: &str, variables: &Map<String, Value>) -> QueryComplexity {
    let scan = scan_query(query, variables);

    let field_points = (scan.breakdown.total_fields / FIELDS_PER_POINT).max(1);
    let estimated_points = field_points + scan.connection_points;

    let mut warnings = scan.warnings;
    if estimated_points > DEFAULT_SAFE_POINTS {
        warnings.push(format!(
            "estimated cost {estimated_points} exceeds the safe budget of {DEFAULT_SAFE_POINTS} points"
        ));
    }

    QueryComplexity {
        estimated_points,
        breakdown: scan.breakdown,
        warnings,
    }
}

/// Estimate the point cost, returning just the number.
#[must_use]
pub fn estimate_points(query: &str, variables: &Map<String, Value>) -> u32 {
    estimate(query, variables).estimated_points
}

/// Decide whether a query fits under `threshold` points.
#[must_use]
pub fn is_complexity_safe(
    query: &str,
    variables: &Map<String, Value>,
    threshold: u32,
) -> ComplexityDecision {
    let estimated_points = estimate_points(query, variables);
    ComplexityDecision {
        safe: estimated_points <= threshold,
        estimated_points,
    }
}

/// Intermediate scan result before the cost formula is applied.
struct ScanResult {
    breakdown: ComplexityBreakdown,
    connection_points: u32,
    warnings: Vec<String>,
}

/// Single-pass scanner over the query text.
///
/// Tracks brace depth (selection sets), paren depth (argument lists), and a
/// stack of enclosing connections so a pagination argument found at depth N
/// is amplified N times. String literals are skipped so argument values like
/// `labels: ["good first issue"]` cannot be mistaken for pagination args.
#[allow(clippy::too_many_lines)]
fn scan_query(query: &str, variables: &Map<String, Value>) -> ScanResult {
    let chars: Vec<char> = query.chars().collect();
    let mut breakdown = ComplexityBreakdown::default();
    let mut connection_points = 0u32;
    let mut warnings = Vec::new();

    let mut brace_depth = 0usize;
    let mut paren_depth = 0usize;
    // Brace depth at which each enclosing connection's selection set opened.
    let mut connection_stack: Vec<usize> = Vec::new();
    // Set when pagination args were seen; the next `{` opens that
    // connection's selection set.
    let mut pending_connection = false;

    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                // Skip string literal, honoring escapes.
                i += 1;
                while i < chars.len() {
                    match chars[i] {
                        '\\' => i += 2,
                        '"' => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                continue;
            }
            '#' => {
                // Comment to end of line.
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            // Braces inside argument lists (input objects like
            // `orderBy: { field: CREATED_AT }`) are not selection sets.
            '{' if paren_depth == 0 => {
                brace_depth += 1;
                if pending_connection {
                    connection_stack.push(brace_depth);
                    pending_connection = false;
                }
                i += 1;
                continue;
            }
            '}' if paren_depth == 0 => {
                if connection_stack.last() == Some(&brace_depth) {
                    connection_stack.pop();
                }
                brace_depth = brace_depth.saturating_sub(1);
                i += 1;
                continue;
            }
            '(' => {
                paren_depth += 1;
                i += 1;
                continue;
            }
            ')' => {
                paren_depth = paren_depth.saturating_sub(1);
                i += 1;
                continue;
            }
            '$' | '@' => {
                // Variable reference or directive: skip the sigil and its
                // identifier so it is not counted as a field.
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                continue;
            }
            _ => {}
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();

            if paren_depth == 0 {
                if brace_depth >= 1 && !KEYWORDS.contains(&ident.as_str()) {
                    breakdown.total_fields += 1;
                }
            } else if ident == "first" || ident == "last" {
                let page = parse_page_size(&chars, i, variables);
                let nesting = connection_stack.len() as u32;

                breakdown.connections += 1;
                if nesting > 0 {
                    breakdown.nested_queries += 1;
                }
                if page > PAGE_SIZE_WARNING_THRESHOLD {
                    warnings.push(format!(
                        "pagination argument `{ident}: {page}` exceeds {PAGE_SIZE_WARNING_THRESHOLD}; large pages are charged proportionally"
                    ));
                }

                let base = (page / CONNECTION_PAGE_DIVISOR).max(1);
                let amplified =
                    base.saturating_mul(NESTED_CONNECTION_MULTIPLIER.saturating_pow(nesting));
                connection_points = connection_points.saturating_add(amplified);
                pending_connection = true;
            }
            continue;
        }

        i += 1;
    }

    ScanResult {
        breakdown,
        connection_points,
        warnings,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse the value following a `first`/`last` argument name.
///
/// Accepts an integer literal or a `$variable` resolved against the
/// variables map; anything else falls back to the default page size.
fn parse_page_size(chars: &[char], mut i: usize, variables: &Map<String, Value>) -> u32 {
    // Skip whitespace and the colon.
    while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ':') {
        i += 1;
    }
    if i >= chars.len() {
        return DEFAULT_PAGE_SIZE;
    }

    if chars[i] == '$' {
        i += 1;
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        return variables
            .get(&name)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_PAGE_SIZE);
    }

    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    chars[start..i]
        .iter()
        .collect::<String>()
        .parse()
        .unwrap_or(DEFAULT_PAGE_SIZE)
}
