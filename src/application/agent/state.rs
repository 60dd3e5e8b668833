use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::domain::Message;

/// One executed tool invocation: its rendered description and the result
/// kept for the caller (structured artifact when present, textual content
/// otherwise).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub input: String,
    pub result: Value,
}

/// What `invoke` returns once the loop reaches its terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct InvokeOutcome {
    pub output: String,
    pub artifacts: Vec<ArtifactRecord>,
    pub history: Vec<Message>,
}

/// The states of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generate,
    Decide,
    HandleTools,
    End,
}

/// Per-invocation working state. Created fresh for every `invoke` call and
/// discarded when it returns.
#[derive(Debug)]
pub(crate) struct LoopState {
    pub query: String,
    pub execute_mode: bool,
    /// Incremented exactly once per completed HandleTools step.
    pub iterations: usize,
    pub generated: Option<Message>,
    pub artifacts: Vec<ArtifactRecord>,
    pub output: String,
}

impl LoopState {
    pub fn new(query: String, execute_mode: bool) -> Self {
        Self {
            query,
            execute_mode,
            iterations: 0,
            generated: None,
            artifacts: Vec::new(),
            output: String::new(),
        }
    }
}

/// Pure transition function of the loop; its only side effect is logging.
pub(crate) fn decide(state: &LoopState, max_attempts: usize) -> Phase {
    if state.iterations >= max_attempts {
        info!(
            iterations = state.iterations,
            "Next action: finish, max iterations reached"
        );
        return Phase::End;
    }
    match &state.generated {
        None => {
            info!("Next action: generate");
            Phase::Generate
        }
        Some(message) if message.has_tool_calls() => {
            info!(
                calls = message.tool_calls.len(),
                "Next action: handle tool calls"
            );
            Phase::HandleTools
        }
        Some(_) => {
            info!("Next action: finish, no tool calls requested");
            Phase::End
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ToolCall;

    fn state() -> LoopState {
        LoopState::new("query".into(), false)
    }

    #[test]
    fn iteration_cap_wins_over_everything_else() {
        let mut state = state();
        state.iterations = 4;
        state.generated = Some(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("call-1", "search", Default::default())],
        ));
        assert_eq!(decide(&state, 4), Phase::End);
    }

    #[test]
    fn missing_response_re_enters_generate() {
        assert_eq!(decide(&state(), 4), Phase::Generate);
    }

    #[test]
    fn tool_calls_route_to_handle_tools() {
        let mut state = state();
        state.generated = Some(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("call-1", "search", Default::default())],
        ));
        assert_eq!(decide(&state, 4), Phase::HandleTools);
    }

    #[test]
    fn plain_response_ends_the_loop() {
        let mut state = state();
        state.generated = Some(Message::assistant("done"));
        assert_eq!(decide(&state, 4), Phase::End);
    }
}
