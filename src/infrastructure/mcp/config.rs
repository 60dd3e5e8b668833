use std::collections::HashMap;
use std::path::PathBuf;

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// How invalid byte sequences in a server's output are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Invalid bytes fail the read.
    #[default]
    Strict,
    /// Invalid bytes are dropped.
    Ignore,
    /// Invalid bytes become U+FFFD.
    Replace,
}

impl DecodeErrorPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "ignore" => Some(Self::Ignore),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Launch description for a stdio MCP server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub encoding: String,
    pub decode_errors: DecodeErrorPolicy,
}

#[derive(Debug, Error)]
pub enum McpConfigError {
    #[error("invalid JSON configuration: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("'command' is required in server configuration")]
    MissingCommand,
    #[error("invalid encoding_error_handler '{value}' (expected strict, ignore or replace)")]
    InvalidDecodePolicy { value: String },
    #[error("unsupported encoding '{value}' (only UTF-8 is supported)")]
    UnsupportedEncoding { value: String },
    #[error("'mcpServers' must be a non-empty object")]
    EmptyServers,
    #[error("server '{server}' not found, available servers: {available:?}")]
    ServerNotFound {
        server: String,
        available: Vec<String>,
    },
    #[error(
        "input must be either an http(s) URL (SSE transport) or a JSON server \
         configuration (stdio transport), got: {input}"
    )]
    Unrecognized { input: String },
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<String>,
    encoding: Option<String>,
    encoding_error_handler: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServerMap {
    #[serde(rename = "mcpServers")]
    mcp_servers: serde_json::Map<String, Value>,
}

impl ServerConfig {
    fn from_raw(name: impl Into<String>, raw: RawServerConfig) -> Result<Self, McpConfigError> {
        let command = raw.command.ok_or(McpConfigError::MissingCommand)?;
        if command.trim().is_empty() {
            return Err(McpConfigError::MissingCommand);
        }

        let encoding = raw.encoding.unwrap_or_else(|| "utf-8".to_string());
        if !matches!(
            encoding.to_ascii_lowercase().as_str(),
            "utf-8" | "utf8" | "utf_8"
        ) {
            return Err(McpConfigError::UnsupportedEncoding { value: encoding });
        }

        let decode_errors = match raw.encoding_error_handler {
            Some(value) => DecodeErrorPolicy::parse(&value)
                .ok_or(McpConfigError::InvalidDecodePolicy { value })?,
            None => DecodeErrorPolicy::default(),
        };

        // Same expansion the rest of the configuration layer applies:
        // unresolved variables fall back to the literal text.
        let expand = |text: &str| -> String {
            shellexpand::full(text)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| text.to_string())
        };

        Ok(Self {
            name: name.into(),
            command: PathBuf::from(expand(&command)),
            args: raw.args.iter().map(|arg| expand(arg)).collect(),
            env: raw.env,
            cwd: raw.cwd.map(|dir| PathBuf::from(expand(&dir))),
            encoding,
            decode_errors,
        })
    }
}

/// Where a remote toolkit lives: an SSE endpoint URL or a launchable
/// stdio server process.
#[derive(Debug, Clone, PartialEq)]
pub enum McpEndpoint {
    Sse { url: Url },
    Stdio(ServerConfig),
}

impl McpEndpoint {
    /// Classifies a configuration string: http(s) URLs become SSE
    /// endpoints, JSON objects become stdio server configs. Anything else
    /// is rejected before any connection attempt.
    pub fn detect(input: &str) -> Result<Self, McpConfigError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(McpConfigError::Unrecognized {
                input: input.to_string(),
            });
        }

        if let Some(url) = parse_http_url(input) {
            debug!(url = %url, "Detected SSE endpoint configuration");
            return Ok(Self::Sse { url });
        }

        if input.starts_with('{') {
            return Self::from_json(input, None);
        }

        Err(McpConfigError::Unrecognized {
            input: truncate(input, 100),
        })
    }

    /// Parses a stdio server configuration, accepting both the flat
    /// `{"command": ...}` form and the `{"mcpServers": {...}}` wrapper.
    /// `server` selects a named entry from the wrapper form; the first
    /// entry is used when absent.
    pub fn from_json(json: &str, server: Option<&str>) -> Result<Self, McpConfigError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|source| McpConfigError::InvalidJson { source })?;

        if value.get("mcpServers").is_some() {
            let wrapper: RawServerMap = serde_json::from_value(value)
                .map_err(|source| McpConfigError::InvalidJson { source })?;
            return Self::from_server_map(wrapper, server);
        }

        let raw: RawServerConfig = serde_json::from_value(value)
            .map_err(|source| McpConfigError::InvalidJson { source })?;
        let config = ServerConfig::from_raw("mcp", raw)?;
        debug!(command = %config.command.display(), "Parsed stdio server configuration");
        Ok(Self::Stdio(config))
    }

    fn from_server_map(wrapper: RawServerMap, server: Option<&str>) -> Result<Self, McpConfigError> {
        if wrapper.mcp_servers.is_empty() {
            return Err(McpConfigError::EmptyServers);
        }

        let (name, entry) = match server {
            Some(requested) => {
                let entry = wrapper.mcp_servers.get(requested).ok_or_else(|| {
                    McpConfigError::ServerNotFound {
                        server: requested.to_string(),
                        available: wrapper.mcp_servers.keys().cloned().collect(),
                    }
                })?;
                (requested.to_string(), entry.clone())
            }
            None => wrapper
                .mcp_servers
                .iter()
                .next()
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .ok_or(McpConfigError::EmptyServers)?,
        };

        let raw: RawServerConfig = serde_json::from_value(entry)
            .map_err(|source| McpConfigError::InvalidJson { source })?;
        let config = ServerConfig::from_raw(&name, raw)?;
        debug!(server = %name, "Selected server from mcpServers configuration");
        Ok(Self::Stdio(config))
    }

    /// Short label for log lines and error messages.
    pub fn label(&self) -> String {
        match self {
            Self::Sse { url } => url.to_string(),
            Self::Stdio(config) => config.name.clone(),
        }
    }
}

fn parse_http_url(input: &str) -> Option<Url> {
    let url = Url::parse(input).ok()?;
    if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() {
        Some(url)
    } else {
        None
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(index, _)| *index < limit)
            .last()
            .map(|(index, ch)| index + ch.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_http_url_as_sse_endpoint() {
        let endpoint = McpEndpoint::detect("http://localhost:8080/sse").expect("valid url");
        assert!(matches!(endpoint, McpEndpoint::Sse { .. }));
        assert_eq!(endpoint.label(), "http://localhost:8080/sse");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(McpEndpoint::detect("ftp://example.com/tools").is_err());
        assert!(McpEndpoint::detect("just some text").is_err());
        assert!(McpEndpoint::detect("").is_err());
    }

    #[test]
    fn parses_flat_stdio_configuration() {
        let input = json!({
            "command": "uvx",
            "args": ["mcp-server-sqlite", "--db-path", "data/test-hr.db"],
            "env": { "DEBUG": "1" },
            "encoding": "utf-8"
        })
        .to_string();

        let endpoint = McpEndpoint::detect(&input).expect("valid config");
        let McpEndpoint::Stdio(config) = endpoint else {
            panic!("expected stdio endpoint");
        };
        assert_eq!(config.command, PathBuf::from("uvx"));
        assert_eq!(config.args.len(), 3);
        assert_eq!(config.env.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(config.decode_errors, DecodeErrorPolicy::Strict);
    }

    #[test]
    fn missing_command_is_rejected_before_connecting() {
        let input = json!({ "args": ["server.py"] }).to_string();
        let err = McpEndpoint::detect(&input).expect_err("missing command");
        assert!(matches!(err, McpConfigError::MissingCommand));
    }

    #[test]
    fn invalid_decode_policy_is_rejected() {
        let input = json!({
            "command": "python",
            "encoding_error_handler": "panic"
        })
        .to_string();
        let err = McpEndpoint::detect(&input).expect_err("bad policy");
        assert!(matches!(
            err,
            McpConfigError::InvalidDecodePolicy { ref value } if value == "panic"
        ));
    }

    #[test]
    fn non_utf8_encoding_is_rejected() {
        let input = json!({ "command": "python", "encoding": "latin-1" }).to_string();
        let err = McpEndpoint::detect(&input).expect_err("unsupported encoding");
        assert!(matches!(err, McpConfigError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = McpEndpoint::detect("{ not json").expect_err("broken json");
        assert!(matches!(err, McpConfigError::InvalidJson { .. }));
    }

    #[test]
    fn selects_named_server_from_wrapper_form() {
        let input = json!({
            "mcpServers": {
                "github": { "command": "docker", "args": ["run", "-i", "--rm"] },
                "sqlite": { "command": "uvx", "args": ["mcp-server-sqlite"] }
            }
        })
        .to_string();

        let endpoint = McpEndpoint::from_json(&input, Some("sqlite")).expect("named server");
        let McpEndpoint::Stdio(config) = endpoint else {
            panic!("expected stdio endpoint");
        };
        assert_eq!(config.name, "sqlite");
        assert_eq!(config.command, PathBuf::from("uvx"));

        let err = McpEndpoint::from_json(&input, Some("ghost")).expect_err("unknown server");
        assert!(matches!(err, McpConfigError::ServerNotFound { .. }));
    }

    #[test]
    fn empty_server_map_is_rejected() {
        let input = json!({ "mcpServers": {} }).to_string();
        let err = McpEndpoint::detect(&input).expect_err("empty map");
        assert!(matches!(err, McpConfigError::EmptyServers));
    }

    #[test]
    fn expands_environment_variables_in_command_and_args() {
        unsafe {
            std::env::set_var("TOOL_RUNNER_TEST_ROOT", "/opt/mcp");
        }
        let input = json!({
            "command": "${TOOL_RUNNER_TEST_ROOT}/server",
            "args": ["--root", "${TOOL_RUNNER_TEST_ROOT}"],
            "cwd": "${TOOL_RUNNER_TEST_ROOT}/work"
        })
        .to_string();

        let McpEndpoint::Stdio(config) = McpEndpoint::detect(&input).expect("valid config")
        else {
            panic!("expected stdio endpoint");
        };
        assert_eq!(config.command, PathBuf::from("/opt/mcp/server"));
        assert_eq!(config.args, vec!["--root".to_string(), "/opt/mcp".to_string()]);
        assert_eq!(config.cwd, Some(PathBuf::from("/opt/mcp/work")));

        unsafe {
            std::env::remove_var("TOOL_RUNNER_TEST_ROOT");
        }
    }
}
