use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use crate::domain::{Message, Role, ToolCall};

/// Chat client against an Ollama server's `/api/chat`, using the native
/// tool-calling API. Ollama does not assign tool-call ids, so the client
/// synthesizes one per requested call.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            http: client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{trimmed}/{path}")
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.endpoint("/api/chat");
        let payload = OllamaChatRequest::from(&request);
        info!(
            model = request.model.as_str(),
            url = %url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending request to model provider"
        );
        let response: OllamaChatResponse = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Received response from model provider");

        let message = response
            .message
            .ok_or_else(|| ModelError::InvalidResponse("missing message field".into()))?;

        Ok(ModelResponse {
            message: message.into_message()?,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
}

impl From<&ModelRequest> for OllamaChatRequest {
    fn from(value: &ModelRequest) -> Self {
        Self {
            model: value.model.clone(),
            messages: value.messages.iter().map(OllamaMessage::from).collect(),
            tools: value
                .tools
                .iter()
                .map(|spec| OllamaTool {
                    kind: "function",
                    function: OllamaToolFunction {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters.clone(),
                    },
                })
                .collect(),
            stream: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

impl From<&Message> for OllamaMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::Human => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        }
    }
}

impl OllamaMessage {
    fn into_message(self) -> Result<Message, ModelError> {
        if Role::from_str(&self.role) != Some(Role::Assistant) {
            return Err(ModelError::InvalidResponse(format!(
                "unexpected role '{}' in response",
                self.role
            )));
        }
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|call| {
                ToolCall::new(
                    format!("call-{}", Uuid::new_v4()),
                    call.function.name,
                    call.function.arguments,
                )
            })
            .collect();
        Ok(Message::assistant_with_calls(self.content, tool_calls))
    }
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
struct OllamaToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: JsonMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolSpec;
    use serde_json::json;

    #[test]
    fn endpoint_joins_paths_correctly() {
        let client = OllamaClient::new("http://localhost:11434/");
        assert_eq!(
            client.endpoint("/api/chat"),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn request_conversion_maps_roles_and_tools() {
        let request = ModelRequest {
            model: "qwen3:8b".into(),
            messages: vec![
                Message::system("stay concise"),
                Message::human("hi"),
                Message::tool_result("call-1", "4 rows"),
            ],
            tools: vec![ToolSpec {
                name: "search".into(),
                description: "Search things".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let payload = OllamaChatRequest::from(&request);
        let roles: Vec<&str> = payload.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "tool"]);
        assert_eq!(payload.tools.len(), 1);
        assert_eq!(payload.tools[0].function.name, "search");
        assert!(!payload.stream);
    }

    #[test]
    fn response_message_gets_synthesized_call_ids() {
        let raw: OllamaMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                { "function": { "name": "search", "arguments": { "query": "x" } } }
            ]
        }))
        .expect("valid message shape");

        let message = raw.into_message().expect("assistant role");
        assert_eq!(message.tool_calls.len(), 1);
        let call = &message.tool_calls[0];
        assert_eq!(call.name, "search");
        assert!(call.id.starts_with("call-"));
        assert_eq!(call.arguments.get("query"), Some(&json!("x")));
    }

    #[test]
    fn non_assistant_response_role_is_rejected() {
        let raw = OllamaMessage {
            role: "system".into(),
            content: "nope".into(),
            tool_calls: Vec::new(),
        };
        assert!(raw.into_message().is_err());
    }
}
