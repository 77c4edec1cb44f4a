//! MCP server handler implementation.
//!
//! This module defines the main server handler that routes tool calls to the
//! worker. Each lifecycle event the host would deliver to an offline worker
//! is one tool.
use std::sync::Arc;

use offcache_worker::OfflineWorker;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::{self, AcknowledgeParams, ClientParams, FetchParams, MessageParams, SyncParams};

/// The main MCP server handler for offcache.
#[derive(Clone)]
pub struct OfflineCacheServer {
    worker: Arc<OfflineWorker>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
#[tool_router]
impl OfflineCacheServer {
    /// Create a new server handler around a started worker.
    pub fn new(worker: Arc<OfflineWorker>) -> Self {
        Self { worker, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Intercept a request. Returns the response served from cache, network, or the offline fallback."
    )]
    async fn fetch(&self, params: Parameters<FetchParams>) -> Result<CallToolResult, McpError> {
        tools::fetch::fetch_impl(&self.worker, params.0).await
    }

    /// Deploy-time install: fetch the whole manifest into a new generation.
    #[tool(description = "Install the configured cache generation. Fails if any manifest URL cannot be fetched.")]
    async fn install(&self) -> Result<CallToolResult, McpError> {
        tools::lifecycle::install_impl(&self.worker).await
    }

    #[tool(description = "Activate the installed generation and delete all others.")]
    async fn activate(&self) -> Result<CallToolResult, McpError> {
        tools::lifecycle::activate_impl(&self.worker).await
    }

    #[tool(description = "Post a page message: SKIP_WAITING, UPDATE_CACHE, or {type: CACHE_URLS, urls}.")]
    async fn message(&self, params: Parameters<MessageParams>) -> Result<CallToolResult, McpError> {
        tools::events::message_impl(&self.worker, params.0).await
    }

    #[tool(description = "Connectivity restored. Tag submit-forms replays queued forms; update-content refreshes.")]
    async fn sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        tools::events::sync_impl(&self.worker, params.0).await
    }

    #[tool(description = "Scheduled refresh of the active generation (tag update-content).")]
    async fn periodic_sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        tools::events::periodic_sync_impl(&self.worker, params.0).await
    }

    #[tool(description = "List generations with state and entry counts, plus queued submissions.")]
    async fn cache_status(&self) -> Result<CallToolResult, McpError> {
        tools::lifecycle::status_impl(&self.worker).await
    }

    #[tool(description = "Register a client session to be told when a new version is ready.")]
    async fn client_register(&self, params: Parameters<ClientParams>) -> Result<CallToolResult, McpError> {
        tools::clients::register_impl(&self.worker, params.0).await
    }

    #[tool(description = "Forget a client session.")]
    async fn client_unregister(&self, params: Parameters<ClientParams>) -> Result<CallToolResult, McpError> {
        tools::clients::unregister_impl(&self.worker, params.0).await
    }

    #[tool(description = "Read a client session's update flags.")]
    async fn client_status(&self, params: Parameters<ClientParams>) -> Result<CallToolResult, McpError> {
        tools::clients::status_impl(&self.worker, params.0).await
    }

    #[tool(description = "Answer the update prompt for a session: reload or dismiss.")]
    async fn client_acknowledge(&self, params: Parameters<AcknowledgeParams>) -> Result<CallToolResult, McpError> {
        tools::clients::acknowledge_impl(&self.worker, params.0).await
    }
}

impl ServerHandler for OfflineCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "offcache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::offline_worker;

    #[tokio::test]
    async fn test_router_lists_every_event() {
        let server = OfflineCacheServer::new(offline_worker().await);
        let names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        for expected in [
            "fetch",
            "install",
            "activate",
            "message",
            "sync",
            "periodic_sync",
            "cache_status",
            "client_register",
            "client_unregister",
            "client_status",
            "client_acknowledge",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = OfflineCacheServer::new(offline_worker().await);
        assert_eq!(server.get_info().server_info.name, "offcache");
    }
}
