//! Client session tools: register, status, acknowledge.

use chrono::{DateTime, Utc};
use offcache_worker::{ClientSession, OfflineWorker, UpdateResponse};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClientParams {
    /// Host-assigned session id (e.g. a tab id).
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AcknowledgeParams {
    pub client_id: String,
    /// "reload" to adopt the new version now, "dismiss" to keep working.
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatusOutput {
    pub client: ClientSession,
    pub checked_at: DateTime<Utc>,
}

fn parse_response(raw: &str) -> Result<UpdateResponse, ToolError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "reload" => Ok(UpdateResponse::Reload),
        "dismiss" => Ok(UpdateResponse::Dismiss),
        other => Err(ToolError::InvalidInput(format!("response must be reload or dismiss, got {other:?}"))),
    }
}

pub async fn register_impl(worker: &OfflineWorker, params: ClientParams) -> Result<CallToolResult, McpError> {
    let session = worker.clients().register(&params.client_id)?;
    json_result(&session)
}

pub async fn unregister_impl(worker: &OfflineWorker, params: ClientParams) -> Result<CallToolResult, McpError> {
    let removed = worker.clients().unregister(&params.client_id);
    json_result(&serde_json::json!({ "client_id": params.client_id, "removed": removed }))
}

/// Session state, with an unanswered prompt expired once it has timed out.
pub async fn status_impl(worker: &OfflineWorker, params: ClientParams) -> Result<CallToolResult, McpError> {
    let checked_at = Utc::now();
    let client = worker
        .clients()
        .status_at(&params.client_id, checked_at)
        .ok_or_else(|| ToolError::InvalidInput(format!("unknown client: {}", params.client_id)))?;
    json_result(&ClientStatusOutput { client, checked_at })
}

pub async fn acknowledge_impl(worker: &OfflineWorker, params: AcknowledgeParams) -> Result<CallToolResult, McpError> {
    let response = parse_response(&params.response)?;
    let session = worker.clients().acknowledge(&params.client_id, response)?;
    json_result(&session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{offline_worker, result_json};

    fn client(id: &str) -> ClientParams {
        ClientParams { client_id: id.into() }
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response("Reload").unwrap(), UpdateResponse::Reload);
        assert_eq!(parse_response(" dismiss ").unwrap(), UpdateResponse::Dismiss);
        assert!(parse_response("later").is_err());
    }

    #[tokio::test]
    async fn test_register_then_status() {
        let worker = offline_worker().await;
        let json = result_json(&register_impl(&worker, client("tab-1")).await.unwrap());
        assert_eq!(json["id"], "tab-1");
        assert_eq!(json["update_available"], false);

        let json = result_json(&status_impl(&worker, client("tab-1")).await.unwrap());
        assert_eq!(json["client"]["id"], "tab-1");
    }

    #[tokio::test]
    async fn test_unknown_client() {
        let worker = offline_worker().await;
        assert!(status_impl(&worker, client("ghost")).await.is_err());
        let params = AcknowledgeParams { client_id: "ghost".into(), response: "reload".into() };
        assert!(acknowledge_impl(&worker, params).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister() {
        let worker = offline_worker().await;
        register_impl(&worker, client("tab-1")).await.unwrap();
        let json = result_json(&unregister_impl(&worker, client("tab-1")).await.unwrap());
        assert_eq!(json["removed"], true);
    }
}
