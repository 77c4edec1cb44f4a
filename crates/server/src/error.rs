//! Structured errors for tool argument handling.
//!
//! Worker failures already convert through `offcache_core::Error`; these
//! cover problems with the arguments a host sends before they reach it.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., a body that is not valid hex).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A result could not be encoded for the host.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let (code, message) = match &err {
            ToolError::InvalidInput(_) => (-32602, err.to_string()),
            ToolError::EncodeFailed(_) => (-32000, err.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
