use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::mcp::{McpConfigError, McpEndpoint};

const DEFAULT_MODEL: &str = "qwen3:8b";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_CONFIG_PATH: &str = "config/tool-runner.toml";
pub const CONFIG_PATH: &str = DEFAULT_CONFIG_PATH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid server entry '{label}': {source}")]
    Server {
        label: String,
        #[source]
        source: McpConfigError,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub ollama_url: String,
    pub system_prompt: Option<String>,
    pub max_attempts: Option<usize>,
    pub servers: Vec<ServerEntry>,
}

/// One `[[servers]]` table: either an SSE endpoint URL or a stdio server
/// launch description.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: Option<String>,
    pub url: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub encoding: Option<String>,
    pub encoding_error_handler: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    ollama_url: Option<String>,
    system_prompt: Option<String>,
    max_attempts: Option<usize>,
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

impl ServerEntry {
    fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| format!("server-{index}"))
    }

    /// Converts the table into an endpoint, routing the stdio form through
    /// the same validation the `--mcp` flag gets.
    fn endpoint(&self, index: usize) -> Result<McpEndpoint, ConfigError> {
        let label = self.label(index);
        let fail = |source| ConfigError::Server {
            label: label.clone(),
            source,
        };

        if let Some(url) = &self.url {
            return McpEndpoint::detect(url).map_err(fail);
        }

        let mut entry = serde_json::Map::new();
        if let Some(command) = &self.command {
            entry.insert("command".to_string(), json!(command));
        }
        entry.insert("args".to_string(), json!(self.args));
        entry.insert("env".to_string(), json!(self.env));
        if let Some(cwd) = &self.cwd {
            entry.insert("cwd".to_string(), json!(cwd));
        }
        if let Some(encoding) = &self.encoding {
            entry.insert("encoding".to_string(), json!(encoding));
        }
        if let Some(handler) = &self.encoding_error_handler {
            entry.insert("encoding_error_handler".to_string(), json!(handler));
        }
        let mut servers = serde_json::Map::new();
        servers.insert(label.clone(), Value::Object(entry));
        let wrapper = json!({ "mcpServers": servers });
        McpEndpoint::from_json(&wrapper.to_string(), Some(&label)).map_err(fail)
    }
}

impl AppConfig {
    /// Loads configuration. An explicit path must exist; the default path
    /// may be absent, in which case built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            system_prompt: None,
            max_attempts: None,
            servers: Vec::new(),
        }
    }

    /// Resolves every `[[servers]]` table into an endpoint, in file order.
    pub fn endpoints(&self) -> Result<Vec<McpEndpoint>, ConfigError> {
        self.servers
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.endpoint(index))
            .collect()
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(AppConfig {
        model: parsed.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        ollama_url: parsed
            .ollama_url
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
        system_prompt: parsed.system_prompt,
        max_attempts: parsed.max_attempts,
        servers: parsed.servers,
    })
}
