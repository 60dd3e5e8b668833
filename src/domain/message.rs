use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "human" | "user" => Some(Role::Human),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A structured request from the model to execute a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: JsonMap<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: JsonMap<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Renders the arguments as ``key=`value` `` pairs, comma-joined.
    /// Used for log lines and approval placeholders.
    pub fn render_arguments(&self) -> String {
        self.arguments
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}=`{text}`"),
                other => format!("{key}=`{other}`"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// ``name(key=`value`, …)`` rendering used in artifact records.
    pub fn describe(&self) -> String {
        format!("{}({})", self.name, self.render_arguments())
    }
}

/// One turn in a conversation. Never mutated after being appended to a
/// [`History`](crate::domain::History).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool invocations requested by the model; only on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call a tool-result message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Structured result payload of a tool call, distinct from the textual
    /// summary in `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
}

impl Message {
    fn bare(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            artifact: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::bare(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::bare(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::bare(Role::Assistant, content)
        }
    }

    /// A tool-result message always carries the id of the call it answers.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::bare(Role::Tool, content)
        }
    }

    pub fn with_artifact(mut self, artifact: Value) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> JsonMap<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::System, Role::Human, Role::Assistant, Role::Tool] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("user"), Some(Role::Human));
        assert_eq!(Role::from_str("model"), None);
    }

    #[test]
    fn renders_arguments_without_string_quotes() {
        let call = ToolCall::new(
            "call-1",
            "search",
            args(&[("query", json!("rust")), ("limit", json!(3))]),
        );
        assert_eq!(call.render_arguments(), "query=`rust`, limit=`3`");
        assert_eq!(call.describe(), "search(query=`rust`, limit=`3`)");
    }

    #[test]
    fn tool_result_carries_its_call_id() {
        let message = Message::tool_result("call-7", "ok");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call-7"));
        assert!(message.artifact.is_none());
    }

    #[test]
    fn artifact_is_kept_separate_from_content() {
        let message =
            Message::tool_result("call-1", "2 rows").with_artifact(json!({"rows": [1, 2]}));
        assert_eq!(message.content, "2 rows");
        assert_eq!(message.artifact, Some(json!({"rows": [1, 2]})));
    }
}
