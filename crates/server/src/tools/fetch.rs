//! fetch tool implementation.
//!
//! Delivers an intercepted request to the worker and returns the response it
//! produced, whether from cache, network or fallback.

use std::collections::BTreeMap;

use offcache_core::{Headers, RequestDescriptor, RequestMode, ResponseDescriptor};
use offcache_worker::OfflineWorker;
use offcache_worker::fallback::FALLBACK_HEADER;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Input parameters for the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    /// Absolute or origin-relative URL.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers. Names are case-insensitive.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request mode as reported by the host (default: same-origin).
    #[serde(default)]
    pub mode: RequestMode,

    /// UTF-8 request body.
    #[serde(default)]
    pub body: Option<String>,

    /// Hex-encoded request body, for binary payloads. Takes precedence over `body`.
    #[serde(default)]
    pub body_hex: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchOutput {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Body as text, when it is valid UTF-8.
    pub body_text: Option<String>,
    /// Body as hex, when it is not valid UTF-8.
    pub body_hex: Option<String>,
    /// Which fallback produced the response, if any.
    pub fallback: Option<String>,
}

impl FetchParams {
    fn into_request(self) -> Result<RequestDescriptor, ToolError> {
        if self.url.trim().is_empty() {
            return Err(ToolError::InvalidInput("url cannot be empty".into()));
        }

        let body = match (self.body_hex, self.body) {
            (Some(hex_body), _) => {
                Some(hex::decode(hex_body.trim()).map_err(|e| ToolError::InvalidInput(format!("body_hex: {e}")))?)
            }
            (None, Some(text)) => Some(text.into_bytes()),
            (None, None) => None,
        };

        let mut request = RequestDescriptor::new(&self.method, self.url).with_mode(self.mode);
        request.headers = self.headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())).collect::<Headers>();
        request.body = body;
        Ok(request)
    }
}

impl From<ResponseDescriptor> for FetchOutput {
    fn from(response: ResponseDescriptor) -> Self {
        let fallback = response.header(FALLBACK_HEADER).map(str::to_string);
        let (body_text, body_hex) = match String::from_utf8(response.body) {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(hex::encode(e.into_bytes()))),
        };
        Self { status: response.status, headers: response.headers, body_text, body_hex, fallback }
    }
}

/// Implementation of the fetch tool.
pub async fn fetch_impl(worker: &OfflineWorker, params: FetchParams) -> Result<CallToolResult, McpError> {
    let request = params.into_request()?;
    let response = worker.on_fetch(request).await;
    json_result(&FetchOutput::from(response))
}
