use thiserror::Error;

/// Transport and protocol faults while talking to an MCP server.
/// Configuration problems are [`McpConfigError`](super::McpConfigError) and
/// are surfaced before any connection attempt.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' sent invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode output of MCP server '{server}': {message}")]
    Decode { server: String, message: String },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("request to MCP server '{server}' was cancelled")]
    Cancelled { server: String },
}

impl McpError {
    pub fn transport(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn decode(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            server: server.into(),
            message: message.into(),
        }
    }
}
