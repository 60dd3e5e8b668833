//! Model provider boundary: "generate a response given history and
//! available tools, optionally requesting tool calls."

mod ollama;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::Message;
pub use ollama::OllamaClient;

/// A tool description as offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model provider returned invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generates the next assistant message from the full conversation and
    /// the currently enabled tool descriptions.
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}
