//! MCP tool implementations.
//!
//! Each tool maps one worker event (or inspection call) onto an MCP tool and
//! returns its result as pretty-printed JSON text.

pub mod clients;
pub mod events;
pub mod fetch;
pub mod lifecycle;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

pub use clients::{AcknowledgeParams, ClientParams};
pub use events::{MessageParams, SyncParams};
pub use fetch::FetchParams;

/// Serialize `value` as the text content of a successful tool result.
pub(crate) fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ToolError::EncodeFailed(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
