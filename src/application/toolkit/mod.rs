//! Tool registry and the local tool-invocation contract.

mod agent_tool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value, json};
use thiserror::Error;

use crate::model::ToolSpec;
pub use agent_tool::AgentTool;

/// Execution fault of a tool handler. The agent loop converts these into
/// tool-result messages instead of aborting the invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },
    #[error("tool '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },
}

impl ToolError {
    pub fn invalid_input(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// The registry was asked for a tool it does not contain. This is a
/// configuration fault: the registry must hold every tool the model was
/// offered.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown tool requested: '{name}'")]
pub struct UnknownTool {
    pub name: String,
}

/// What a tool call produces: a textual summary for the conversation and an
/// optional structured artifact kept alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Option<Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Value) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// An invocable tool. Implementations should be stateless; any context they
/// need must be captured at construction time.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: JsonMap<String, Value>) -> Result<ToolOutput, ToolError>;
}

/// Describes one invocable tool. Immutable after registration except for
/// the `enabled` flag.
#[derive(Clone)]
pub struct ToolEntry {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<dyn ToolHandler>,
    auto_execute: bool,
    direct_response: bool,
    remote: bool,
    enabled: bool,
}

impl ToolEntry {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
            auto_execute: true,
            direct_response: false,
            remote: false,
            enabled: true,
        }
    }

    /// Schema for tools that take no arguments.
    pub fn empty_parameters() -> Value {
        json!({ "type": "object", "properties": {} })
    }

    pub fn auto_execute(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    pub fn direct_response(mut self, direct_response: bool) -> Self {
        self.direct_response = direct_response;
        self
    }

    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    pub fn is_auto_execute(&self) -> bool {
        self.auto_execute
    }

    pub fn is_direct_response(&self) -> bool {
        self.direct_response
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name)
            .field("auto_execute", &self.auto_execute)
            .field("direct_response", &self.direct_response)
            .field("remote", &self.remote)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Insertion-ordered mapping from tool name to [`ToolEntry`]. One registry
/// per agent instance; single writer assumed.
#[derive(Debug, Default, Clone)]
pub struct Toolkit {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing any previous entry with the same name while
    /// keeping its original position.
    pub fn register(&mut self, entry: ToolEntry) {
        match self.index.get(entry.name()) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.name().to_owned(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolEntry, UnknownTool> {
        self.index
            .get(name)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| UnknownTool {
                name: name.to_owned(),
            })
    }

    /// The exact ordered tool list offered to the model on each generate
    /// step: every enabled entry, in registration order.
    pub fn enabled_specs(&self) -> Vec<ToolSpec> {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(ToolEntry::spec)
            .collect()
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), UnknownTool> {
        let position = *self.index.get(name).ok_or_else(|| UnknownTool {
            name: name.to_owned(),
        })?;
        self.entries[position].enabled = enabled;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::ready;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, arguments: JsonMap<String, Value>) -> Result<ToolOutput, ToolError> {
            ready(Ok(ToolOutput::text(
                Value::Object(arguments).to_string(),
            )))
            .await
        }
    }

    fn entry(name: &str) -> ToolEntry {
        ToolEntry::new(
            name,
            format!("{name} description"),
            ToolEntry::empty_parameters(),
            Arc::new(EchoTool),
        )
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let mut toolkit = Toolkit::new();
        toolkit.register(entry("search").auto_execute(false).remote(true));

        let found = toolkit.lookup("search").expect("registered tool");
        assert_eq!(found.name(), "search");
        assert!(!found.is_auto_execute());
        assert!(found.is_remote());
        assert!(found.is_enabled());
    }

    #[test]
    fn lookup_of_missing_tool_is_an_error() {
        let toolkit = Toolkit::new();
        let err = toolkit.lookup("nope").expect_err("missing tool");
        assert_eq!(err.name, "nope");
    }

    #[test]
    fn enabled_specs_follow_registration_order_and_flags() {
        let mut toolkit = Toolkit::new();
        toolkit.register(entry("alpha"));
        toolkit.register(entry("beta"));
        toolkit.register(entry("gamma"));
        toolkit.set_enabled("beta", false).expect("known tool");

        let names: Vec<String> = toolkit
            .enabled_specs()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["alpha", "gamma"]);

        toolkit.set_enabled("beta", true).expect("known tool");
        assert_eq!(toolkit.enabled_specs().len(), 3);
    }

    #[test]
    fn register_replaces_by_name_in_place() {
        let mut toolkit = Toolkit::new();
        toolkit.register(entry("alpha"));
        toolkit.register(entry("beta"));
        toolkit.register(entry("alpha").direct_response(true));

        assert_eq!(toolkit.len(), 2);
        let replaced = toolkit.lookup("alpha").expect("still registered");
        assert!(replaced.is_direct_response());
        // Position preserved.
        let first = toolkit.iter().next().expect("non-empty");
        assert_eq!(first.name(), "alpha");
    }

    #[test]
    fn toggling_unknown_tool_fails() {
        let mut toolkit = Toolkit::new();
        assert!(toolkit.set_enabled("ghost", false).is_err());
    }
}
