//! MCP adapter: remote tool descriptions in, local tool entries out.
//!
//! Sessions are scoped: every listing or call opens a session, uses it, and
//! closes it on every exit path, including failure. Transport internals
//! (process spawning, SSE streams) never leak past [`McpSession`].

mod adapter;
mod config;
mod error;
mod sse;
mod stdio;

use async_trait::async_trait;
use serde_json::Value;

pub use adapter::{RemoteTool, load_toolkit};
pub use config::{DecodeErrorPolicy, McpConfigError, McpEndpoint, ServerConfig};
pub use error::McpError;
pub use sse::SseSession;
pub use stdio::StdioSession;

pub(crate) const PROTOCOL_VERSION: &str = "2025-06-18";

/// A remote tool description as reported by `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// One open, initialized MCP session. Obtained from
/// [`McpEndpoint::open`]; must be closed with [`McpSession::close`]
/// (transports also reclaim their resources on drop as a safety net).
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, McpError>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError>;

    /// Graceful teardown; best-effort and idempotent.
    async fn close(&self);
}

impl McpEndpoint {
    /// Opens a session against this endpoint: connect or spawn, run the
    /// `initialize` handshake, send `notifications/initialized`.
    pub async fn open(&self) -> Result<Box<dyn McpSession>, McpError> {
        match self {
            McpEndpoint::Sse { url } => {
                let session = SseSession::open(url.clone()).await?;
                Ok(Box::new(session))
            }
            McpEndpoint::Stdio(config) => {
                let session = StdioSession::open(config.clone()).await?;
                Ok(Box::new(session))
            }
        }
    }
}

/// Parses a `tools/list` result payload.
pub(crate) fn parse_tool_list(result: &Value) -> Vec<RemoteToolInfo> {
    let Some(tools) = result.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;
            Some(RemoteToolInfo {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_schema: tool.get("inputSchema").cloned(),
            })
        })
        .collect()
}

/// Builds the `initialize` request parameters shared by both transports.
pub(crate) fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {}
    })
}
