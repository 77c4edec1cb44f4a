//! install, activate and cache_status tools.

use offcache_worker::OfflineWorker;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;

/// Install the configured generation (activating it when `skip_waiting` is set).
pub async fn install_impl(worker: &OfflineWorker) -> Result<CallToolResult, McpError> {
    let outcome = worker.on_install().await?;
    json_result(&outcome)
}

/// Activate the waiting generation.
pub async fn activate_impl(worker: &OfflineWorker) -> Result<CallToolResult, McpError> {
    let report = worker.on_activate().await?;
    json_result(&report)
}

pub async fn status_impl(worker: &OfflineWorker) -> Result<CallToolResult, McpError> {
    let status = worker.status().await?;
    json_result(&status)
}
