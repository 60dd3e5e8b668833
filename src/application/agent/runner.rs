use serde_json::Value;
use tracing::{info, warn};

use super::errors::AgentError;
use super::instructions::{QA_ASSISTANT_INSTRUCTION, tool_calling_instruction};
use super::state::{ArtifactRecord, InvokeOutcome, LoopState, Phase, decide};
use crate::application::toolkit::Toolkit;
use crate::domain::{History, Message};
use crate::model::{ModelProvider, ModelRequest};

pub const DEFAULT_MAX_ATTEMPTS: usize = 4;

/// A chat agent running the bounded Generate -> Decide -> HandleTools loop
/// over one conversation history and one tool registry.
///
/// `invoke` takes `&mut self`, so one agent instance can run at most one
/// invocation at a time; independent agents are fully isolated and may run
/// concurrently.
pub struct Agent<P: ModelProvider> {
    name: String,
    provider: P,
    model: String,
    toolkit: Toolkit,
    history: History,
    max_attempts: usize,
}

pub struct AgentBuilder<P: ModelProvider> {
    name: String,
    provider: P,
    model: String,
    toolkit: Toolkit,
    system_instruction: Option<String>,
    max_attempts: usize,
}

impl<P: ModelProvider> AgentBuilder<P> {
    pub fn toolkit(mut self, toolkit: Toolkit) -> Self {
        self.toolkit = toolkit;
        self
    }

    /// Replaces the default question-answering instruction.
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> Result<Agent<P>, AgentError> {
        let mut history = History::new();
        let instruction = self
            .system_instruction
            .unwrap_or_else(|| QA_ASSISTANT_INSTRUCTION.to_string());
        if !instruction.is_empty() {
            history.append(Message::system(instruction))?;
        }
        if !self.toolkit.is_empty() {
            history.append(Message::system(tool_calling_instruction(
                self.max_attempts.saturating_sub(1),
            )))?;
        }

        info!(agent = %self.name, model = %self.model, tools = self.toolkit.len(), "Initializing agent");
        Ok(Agent {
            name: self.name,
            provider: self.provider,
            model: self.model,
            toolkit: self.toolkit,
            history,
            max_attempts: self.max_attempts,
        })
    }
}

impl<P: ModelProvider> Agent<P> {
    pub fn builder(
        name: impl Into<String>,
        provider: P,
        model: impl Into<String>,
    ) -> AgentBuilder<P> {
        AgentBuilder {
            name: name.into(),
            provider,
            model: model.into(),
            toolkit: Toolkit::new(),
            system_instruction: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        info!(agent = %self.name, model = %self.model, "Model changed");
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    pub fn toolkit_mut(&mut self) -> &mut Toolkit {
        &mut self.toolkit
    }

    /// Read-only view of the conversation so far.
    pub fn history(&self) -> &[Message] {
        self.history.snapshot()
    }

    /// Restores a previously saved conversation wholesale.
    pub fn replace_history(&mut self, messages: Vec<Message>) -> Result<(), AgentError> {
        self.history.replace(messages)?;
        Ok(())
    }

    /// Runs one request through the loop to completion. With
    /// `execute_mode` off, only `auto_execute` tools run; everything else
    /// yields an approval-required placeholder instead of executing.
    pub async fn invoke(
        &mut self,
        query: impl Into<String>,
        execute_mode: bool,
    ) -> Result<InvokeOutcome, AgentError> {
        let mut state = LoopState::new(query.into(), execute_mode);
        let mut phase = Phase::Generate;

        loop {
            phase = match phase {
                Phase::Generate => {
                    self.generate(&mut state).await?;
                    Phase::Decide
                }
                Phase::Decide => decide(&state, self.max_attempts),
                Phase::HandleTools => {
                    self.handle_tool_calls(&mut state).await?;
                    Phase::Decide
                }
                Phase::End => break,
            };
        }

        info!(agent = %self.name, iterations = state.iterations, "Finished processing request");
        Ok(InvokeOutcome {
            output: state.output,
            artifacts: state.artifacts,
            history: self.history.snapshot().to_vec(),
        })
    }

    async fn generate(&mut self, state: &mut LoopState) -> Result<(), AgentError> {
        if state.iterations == 0 {
            info!(agent = %self.name, "Start processing request");
            self.history.append(Message::human(state.query.clone()))?;
        }
        info!(agent = %self.name, iteration = state.iterations + 1, "Generate");

        let request = ModelRequest {
            model: self.model.clone(),
            messages: self.history.snapshot().to_vec(),
            tools: self.toolkit.enabled_specs(),
        };
        let response = self.provider.generate(request).await?;

        state.output = response.message.content.clone();
        self.history.append(response.message.clone())?;
        state.generated = Some(response.message);
        Ok(())
    }

    async fn handle_tool_calls(&mut self, state: &mut LoopState) -> Result<(), AgentError> {
        info!(agent = %self.name, iteration = state.iterations + 1, "Handle tool calls");

        // Decide only routes here when a response with calls is present.
        let Some(response) = state.generated.take() else {
            return Ok(());
        };

        let mut direct_response = false;
        let mut content = String::new();

        // Strictly sequential, in request order; multiple calls in one
        // turn are never parallelized.
        for call in &response.tool_calls {
            let entry = self.toolkit.lookup(&call.name)?;
            let args = call.render_arguments();

            let tool_message = if entry.is_auto_execute() || state.execute_mode {
                info!(tool = %call.name, args = %args, remote = entry.is_remote(), "Calling tool");
                match entry.handler().call(call.arguments.clone()).await {
                    Ok(output) => {
                        let message = Message::tool_result(&call.id, output.content);
                        match output.artifact {
                            Some(artifact) => message.with_artifact(artifact),
                            None => message,
                        }
                    }
                    Err(err) => {
                        // Surface the fault to the model instead of
                        // aborting; the iteration budget bounds retries.
                        warn!(tool = %call.name, %err, "Tool execution failed");
                        Message::tool_result(&call.id, format!("Tool execution failed: {err}"))
                    }
                }
            } else {
                info!(tool = %call.name, args = %args, "Requested tool requires user approval");
                Message::tool_result(
                    &call.id,
                    format!("User approval required to execute {}({args})", call.name),
                )
            };

            state.artifacts.push(ArtifactRecord {
                input: call.describe(),
                result: tool_message
                    .artifact
                    .clone()
                    .unwrap_or_else(|| Value::String(tool_message.content.clone())),
            });
            let direct = entry.is_direct_response();
            self.history.append(tool_message.clone())?;

            if direct {
                info!(tool = %call.name, "Tool direct response");
                direct_response = true;
                content.push_str(&tool_message.content);
            }
        }

        state.iterations += 1;
        state.output = content.clone();
        state.generated = if direct_response {
            let synthesized = Message::assistant(content);
            self.history.append(synthesized.clone())?;
            Some(synthesized)
        } else {
            None
        };
        Ok(())
    }
}
