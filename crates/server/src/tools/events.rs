//! message, sync and periodic_sync tools.

use offcache_core::Error;
use offcache_worker::{HostMessage, OfflineWorker, SYNC_UPDATE_CONTENT};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Input parameters for the message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageParams {
    /// Either a bare command string (`"SKIP_WAITING"`, `"UPDATE_CACHE"`) or an
    /// object tagged by `type`, e.g. `{"type": "CACHE_URLS", "urls": ["/a.css"]}`.
    pub message: serde_json::Value,
}

/// Input parameters for the sync and periodic_sync tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// Sync tag: "submit-forms" or "update-content".
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    SYNC_UPDATE_CONTENT.into()
}

fn parse_message(value: serde_json::Value) -> Result<HostMessage, ToolError> {
    match value {
        serde_json::Value::String(command) => command.parse().map_err(|e: Error| ToolError::InvalidInput(e.to_string())),
        other => {
            serde_json::from_value(other).map_err(|e| ToolError::InvalidInput(format!("unrecognized message: {e}")))
        }
    }
}

/// Deliver a page message. The reply mirrors `{success, error?}`.
pub async fn message_impl(worker: &OfflineWorker, params: MessageParams) -> Result<CallToolResult, McpError> {
    let message = parse_message(params.message)?;
    let reply = worker.on_message(message).await;
    json_result(&reply)
}

pub async fn sync_impl(worker: &OfflineWorker, params: SyncParams) -> Result<CallToolResult, McpError> {
    let report = worker.on_sync(&params.tag).await?;
    json_result(&report)
}

pub async fn periodic_sync_impl(worker: &OfflineWorker, params: SyncParams) -> Result<CallToolResult, McpError> {
    let report = worker.on_periodic_sync(&params.tag).await?;
    json_result(&report)
}
