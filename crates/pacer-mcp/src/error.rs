// SPDX-License-Identifier: Apache-2.0

//! Error conversion from pacer-core errors to MCP errors.

use pacer_core::PacerError;
use rmcp::model::{ErrorCode, ErrorData};

/// Convert `PacerError` into a typed MCP error based on error variant.
///
/// Maps error variants to appropriate MCP error codes:
/// - `InvalidQuery`, `Config` -> `INVALID_PARAMS`
/// - All others -> `INTERNAL_ERROR`
pub fn pacer_error_to_mcp(err: &PacerError) -> ErrorData {
    match err {
        PacerError::InvalidQuery { .. } | PacerError::Config { .. } => {
            ErrorData::invalid_params(err.to_string(), None)
        }
        _ => ErrorData::internal_error(err.to_string(), None),
    }
}

/// Convert any error implementing Display into an MCP internal error.
pub fn generic_to_mcp_error<E: std::fmt::Display>(err: E) -> ErrorData {
    ErrorData::internal_error(err.to_string(), None)
}
