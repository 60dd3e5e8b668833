//! System instruction texts seeded into a fresh agent's history.

/// Default assistant instruction for question-answering agents.
pub const QA_ASSISTANT_INSTRUCTION: &str = "\
You are an assistant for question-answering tasks.
- Always be accurate. If you don't know the answer, say that you don't know.
- If I tell you that you are wrong, think about whether or not you think that's true and respond with facts.
- Avoid apologizing or making conciliatory statements.
- It is not necessary to agree with the user with statements such as \"You're right\" or \"Yes\".
- Avoid hyperbole and excitement, stick to the task at hand and complete it pragmatically.";

/// The retry contract described to the model when tools are registered.
/// The loop itself never synthesizes the closing sentence; saying it is
/// left to the model.
pub fn tool_calling_instruction(max_attempts: usize) -> String {
    format!(
        "You can use available tools to retrieve additional information or respond directly with your own answer.\n\
         \n\
         Given a tool is called,\n\
         When the tool returns an error in its response,\n\
         Then fix the input and call that tool one more time (you have {max_attempts} attempts to fix the error).\n\
         Avoid mentioning errors and fixes you have done in the final response, just provide the answer to the question.\n\
         When unable to fix errors after all attempts say `I cannot answer this question`."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_embeds_the_attempt_budget() {
        let text = tool_calling_instruction(3);
        assert!(text.contains("you have 3 attempts"));
        assert!(text.contains("I cannot answer this question"));
    }
}
