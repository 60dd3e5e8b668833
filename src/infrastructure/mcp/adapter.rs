use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, info};

use super::config::McpEndpoint;
use super::error::McpError;
use crate::application::toolkit::{ToolEntry, ToolError, ToolHandler, ToolOutput};

/// A remote MCP tool exposed through the local tool contract. One fixed
/// type for every remote tool; the differences live in its fields, not in
/// generated types.
pub struct RemoteTool {
    endpoint: Arc<McpEndpoint>,
    name: String,
}

impl RemoteTool {
    pub fn new(endpoint: Arc<McpEndpoint>, name: impl Into<String>) -> Self {
        Self {
            endpoint,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for RemoteTool {
    async fn call(&self, arguments: JsonMap<String, Value>) -> Result<ToolOutput, ToolError> {
        debug!(tool = %self.name, endpoint = %self.endpoint.label(), "dispatching remote tool call");
        let session = self
            .endpoint
            .open()
            .await
            .map_err(|err| ToolError::execution(&self.name, err.to_string()))?;

        // Scoped session: close on both the success and the failure path.
        let result = session
            .call_tool(&self.name, Value::Object(arguments))
            .await;
        session.close().await;

        let result = result.map_err(|err| ToolError::execution(&self.name, err.to_string()))?;
        let content = extract_text(&result);
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolError::execution(&self.name, content));
        }
        Ok(ToolOutput {
            content,
            artifact: Some(result),
        })
    }
}

/// Lists the tools of a remote endpoint and wraps each of them into a
/// [`ToolEntry`]. Remote tools are never auto-executed and never answer a
/// turn directly; the owning application may flip those flags afterwards.
pub async fn load_toolkit(endpoint: Arc<McpEndpoint>) -> Result<Vec<ToolEntry>, McpError> {
    let session = endpoint.open().await?;
    let listed = session.list_tools().await;
    session.close().await;
    let listed = listed?;

    info!(
        endpoint = %endpoint.label(),
        tools = listed.len(),
        "Loaded remote toolkit"
    );

    Ok(listed
        .into_iter()
        .map(|info| {
            let handler = Arc::new(RemoteTool::new(Arc::clone(&endpoint), info.name.clone()));
            ToolEntry::new(
                info.name,
                info.description.unwrap_or_default(),
                info.input_schema
                    .unwrap_or_else(ToolEntry::empty_parameters),
                handler,
            )
            .auto_execute(false)
            .remote(true)
        })
        .collect())
}

/// Joins the text blocks of a `tools/call` result. Falls back to the raw
/// JSON for results without a textual part.
fn extract_text(result: &Value) -> String {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return result.to_string();
    };
    let texts: Vec<&str> = content
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_and_joins_text_blocks() {
        let result = json!({
            "content": [
                { "type": "text", "text": "row 1" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "row 2" }
            ]
        });
        assert_eq!(extract_text(&result), "row 1\nrow 2");
    }

    #[test]
    fn falls_back_to_raw_json_without_text_blocks() {
        let result = json!({ "content": [], "structuredContent": { "rows": 3 } });
        assert_eq!(extract_text(&result), result.to_string());
    }
}
