// SPDX-License-Identifier: Apache-2.0

//! Response size limiting for AI-assistant consumption.
//!
//! Upstream responses can be far larger than an assistant context can hold.
//! [`limit_response`] caps arrays by item count and serialized byte size,
//! and truncates oversized string fields in place. It is a stateless
//! post-processing step applied after a successful call, and it never fails:
//! if anything goes wrong internally the original data is returned untouched.

use serde_json::Value;

/// String fields longer than this many characters are truncated.
const MAX_STRING_CHARS: usize = 5_000;

/// Marker appended to truncated string fields.
const TRUNCATION_MARKER: &str = "...[truncated]";

/// A size-limited response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LimitedResponse {
    /// The (possibly truncated) payload.
    pub data: Value,
    /// Whether any truncation was applied.
    pub truncated: bool,
    /// Serialized byte size before truncation, when truncation occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
}

/// Cap a response payload to `max_bytes` / `max_items`.
///
/// Arrays are truncated to `max_items` first; if the serialized prefix still
/// exceeds `max_bytes`, the largest fitting prefix is found by binary search.
/// Objects are walked recursively and oversized string fields are truncated
/// with a marker. Numbers, booleans, and nulls pass through unchanged.
#[must_use]
pub fn limit_response(data: Value, max_bytes: usize, max_items: usize) -> LimitedResponse {
    match data {
        Value::Array(items) => limit_array(items, max_bytes, max_items),
        other => {
            let mut value = other;
            let truncated = truncate_strings(&mut value);
            LimitedResponse {
                data: value,
                truncated,
                original_size: None,
            }
        }
    }
}

fn limit_array(items: Vec<Value>, max_bytes: usize, max_items: usize) -> LimitedResponse {
    let original_size = serialized_size(&Value::Array(items.clone()));
    let mut kept: Vec<Value> = items;
    let mut truncated = false;

    if kept.len() > max_items {
        kept.truncate(max_items);
        truncated = true;
    }

    if serialized_size(&Value::Array(kept.clone())) > max_bytes {
        let fit = largest_fitting_prefix(&kept, max_bytes);
        kept.truncate(fit);
        truncated = true;
    }

    let mut data = Value::Array(kept);
    if truncate_strings(&mut data) {
        truncated = true;
    }

    LimitedResponse {
        data,
        truncated,
        original_size: truncated.then_some(original_size),
    }
}

/// Binary search the largest prefix length whose serialization fits.
fn largest_fitting_prefix(items: &[Value], max_bytes: usize) -> usize {
    let mut lo = 0usize;
    let mut hi = items.len();
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        let prefix = Value::Array(items[..mid].to_vec());
        if serialized_size(&prefix) <= max_bytes {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Serialized byte size of a value; a failure counts as zero so the
/// never-fails contract holds.
fn serialized_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

/// Recursively truncate oversized strings, returning whether any changed.
fn truncate_strings(value: &mut Value) -> bool {
    match value {
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_CHARS {
                let keep = MAX_STRING_CHARS - TRUNCATION_MARKER.chars().count();
                let mut shortened: String = s.chars().take(keep).collect();
                shortened.push_str(TRUNCATION_MARKER);
                *s = shortened;
                true
            } else {
                false
            }
        }
        Value::Array(items) => {
            let mut any = false;
            for item in items {
                any |= truncate_strings(item);
            }
            any
        }
        Value::Object(map) => {
            let mut any = false;
            for (_, v) in map.iter_mut() {
                any |= truncate_strings(v);
            }
            any
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_payload_passes_through() {
        let data = json!({"name": "octocat", "id": 1});
        let result = limit_response(data.clone(), 1024 * 1024, 100);
        assert!(!result.truncated);
        assert_eq!(result.data, data);
        assert!(result.original_size.is_none());
    }

    #[test]
    fn array_truncated_to_max_items() {
        let data = json!([1, 2, 3, 4, 5]);
        let result = limit_response(data, 1024 * 1024, 3);
        assert!(result.truncated);
        assert_eq!(result.data, json!([1, 2, 3]));
    }

    #[test]
    fn large_array_fits_byte_budget() {
        // 10,000 identical ~1KB objects against a 1MB budget.
        let item = json!({"body": "x".repeat(1000)});
        let items: Vec<Value> = (0..10_000).map(|_| item.clone()).collect();
        let max_bytes = 1024 * 1024;

        let result = limit_response(Value::Array(items), max_bytes, 10_000);

        assert!(result.truncated);
        assert!(serialized_size(&result.data) <= max_bytes);
        assert!(result.original_size.expect("original size") > max_bytes);
        // The budget should still be mostly used, not wildly undershot.
        assert!(!result.data.as_array().expect("array").is_empty());
    }

    #[test]
    fn oversized_strings_truncated_with_marker() {
        let data = json!({"body": "a".repeat(MAX_STRING_CHARS + 100), "count": 3});
        let result = limit_response(data, 1024 * 1024 * 16, 100);

        assert!(result.truncated);
        let body = result.data["body"].as_str().expect("string");
        assert!(body.ends_with(TRUNCATION_MARKER));
        assert!(body.chars().count() <= MAX_STRING_CHARS);
        assert_eq!(result.data["count"], json!(3));
    }

    #[test]
    fn nested_strings_truncated() {
        let data = json!({"issues": [{"body": "b".repeat(MAX_STRING_CHARS * 2)}]});
        let result = limit_response(data, 1024 * 1024 * 16, 100);
        assert!(result.truncated);
        let body = result.data["issues"][0]["body"].as_str().expect("string");
        assert!(body.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn scalars_untouched() {
        let data = json!([true, 42, null, 3.25]);
        let result = limit_response(data.clone(), 1024 * 1024, 100);
        assert!(!result.truncated);
        assert_eq!(result.data, data);
    }

    #[test]
    fn zero_budget_yields_empty_array() {
        let data = json!([{"k": "v"}, {"k": "w"}]);
        let result = limit_response(data, 1, 100);
        assert!(result.truncated);
        assert_eq!(result.data, json!([]));
    }
}
