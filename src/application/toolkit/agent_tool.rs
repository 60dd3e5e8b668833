//! Exposes a whole agent as a callable tool of another agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value, json};
use tokio::sync::Mutex;
use tracing::info;

use super::{ToolEntry, ToolError, ToolHandler, ToolOutput};
use crate::application::agent::Agent;
use crate::model::ModelProvider;

/// Delegates `{ "query": ... }` calls to a nested [`Agent`]. The nested
/// agent keeps its own history across calls and always runs with execute
/// mode on, so its tools need no approval round trip through the parent.
pub struct AgentTool<P: ModelProvider + 'static> {
    agent: Arc<Mutex<Agent<P>>>,
}

impl<P: ModelProvider + 'static> AgentTool<P> {
    pub fn new(agent: Agent<P>) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
        }
    }

    /// Builds the registry entry for the wrapped agent. The entry answers
    /// directly: the nested agent's reply is the parent's final output for
    /// the turn, without another generate step paraphrasing it.
    pub fn entry(agent: Agent<P>, description: impl Into<String>) -> ToolEntry {
        let name = agent.name().to_owned();
        ToolEntry::new(
            name,
            description,
            Self::parameters(),
            Arc::new(Self::new(agent)),
        )
        .direct_response(true)
    }

    fn parameters() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The request to hand over, phrased as a complete question"
                }
            },
            "required": ["query"]
        })
    }
}

#[async_trait]
impl<P: ModelProvider + 'static> ToolHandler for AgentTool<P> {
    async fn call(&self, arguments: JsonMap<String, Value>) -> Result<ToolOutput, ToolError> {
        let mut agent = self.agent.lock().await;
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::invalid_input(agent.name(), "missing required string field 'query'")
            })?
            .to_owned();

        info!(agent = %agent.name(), query = %query, "Delegating to nested agent");
        let outcome = agent
            .invoke(&query, true)
            .await
            .map_err(|err| ToolError::execution(agent.name(), err.to_string()))?;

        let content = format!("Response to request `{query}` is:\n{}", outcome.output);
        let artifact = serde_json::to_value(&outcome)
            .map_err(|err| ToolError::execution(agent.name(), err.to_string()))?;
        Ok(ToolOutput::text(content).with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Message;
    use crate::model::{ModelError, ModelRequest, ModelResponse};

    struct OneLinerProvider;

    #[async_trait]
    impl ModelProvider for OneLinerProvider {
        async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                message: Message::assistant("42"),
            })
        }
    }

    fn nested_agent() -> Agent<OneLinerProvider> {
        Agent::builder("calculator", OneLinerProvider, "qwen3:8b")
            .build()
            .expect("agent builds")
    }

    #[tokio::test]
    async fn delegates_query_and_wraps_the_answer() {
        let tool = AgentTool::new(nested_agent());
        let mut arguments = JsonMap::new();
        arguments.insert("query".into(), json!("what is 6 * 7?"));

        let output = tool.call(arguments).await.expect("call succeeds");
        assert_eq!(output.content, "Response to request `what is 6 * 7?` is:\n42");
        let artifact = output.artifact.expect("outcome artifact");
        assert_eq!(artifact["output"], json!("42"));
    }

    #[tokio::test]
    async fn missing_query_is_an_input_fault() {
        let tool = AgentTool::new(nested_agent());
        let err = tool.call(JsonMap::new()).await.expect_err("must fail");
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[test]
    fn entry_is_named_after_the_agent_and_answers_directly() {
        let entry = AgentTool::entry(nested_agent(), "Answers arithmetic questions");
        assert_eq!(entry.name(), "calculator");
        assert!(entry.is_direct_response());
        assert!(entry.is_auto_execute());
        assert_eq!(entry.parameters()["required"], json!(["query"]));
    }
}
