use thiserror::Error;

use super::message::{Message, Role};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("tool-result message at position {position} does not carry a tool call id")]
    MissingCallId { position: usize },
}

/// Ordered, append-only sequence of messages forming the model context.
///
/// Insertion order is significant; messages are never mutated or removed
/// after append. The history grows unbounded across the process lifetime
/// unless the owner calls [`History::prune`].
#[derive(Debug, Default, Clone)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message. The only validation is the tool-result/call-id
    /// invariant; everything else is accepted as-is.
    pub fn append(&mut self, message: Message) -> Result<(), HistoryError> {
        Self::check(&message, self.messages.len())?;
        self.messages.push(message);
        Ok(())
    }

    /// Read-only ordered view of the whole conversation.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the whole conversation, e.g. to restore a saved one.
    /// Every message is re-validated against the call-id invariant.
    pub fn replace(&mut self, messages: Vec<Message>) -> Result<(), HistoryError> {
        for (position, message) in messages.iter().enumerate() {
            Self::check(message, position)?;
        }
        self.messages = messages;
        Ok(())
    }

    /// Evicts old turns: keeps every system message plus the last
    /// `max_turns` non-system messages, preserving order.
    pub fn prune(&mut self, max_turns: usize) {
        let non_system = self
            .messages
            .iter()
            .filter(|message| message.role != Role::System)
            .count();
        if non_system <= max_turns {
            return;
        }
        let mut to_drop = non_system - max_turns;
        self.messages.retain(|message| {
            if message.role == Role::System || to_drop == 0 {
                true
            } else {
                to_drop -= 1;
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn check(message: &Message, position: usize) -> Result<(), HistoryError> {
        if message.role == Role::Tool && message.tool_call_id.is_none() {
            return Err(HistoryError::MissingCallId { position });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_insertion_order() {
        let mut history = History::new();
        history.append(Message::system("be brief")).expect("append");
        history.append(Message::human("hi")).expect("append");
        history.append(Message::assistant("hello")).expect("append");

        let roles: Vec<Role> = history.snapshot().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Assistant]);
    }

    #[test]
    fn rejects_tool_result_without_call_id() {
        let mut history = History::new();
        let mut message = Message::tool_result("call-1", "ok");
        message.tool_call_id = None;

        assert_eq!(
            history.append(message),
            Err(HistoryError::MissingCallId { position: 0 })
        );
        assert!(history.is_empty());
    }

    #[test]
    fn replace_validates_every_message() {
        let mut history = History::new();
        history.append(Message::human("hi")).expect("append");

        let mut bad = Message::tool_result("call-1", "ok");
        bad.tool_call_id = None;
        let result = history.replace(vec![Message::system("s"), bad]);

        assert_eq!(result, Err(HistoryError::MissingCallId { position: 1 }));
        // Failed replace leaves the history untouched.
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn prune_keeps_system_messages_and_recent_turns() {
        let mut history = History::new();
        history.append(Message::system("instructions")).expect("append");
        for turn in 0..6 {
            history
                .append(Message::human(format!("question {turn}")))
                .expect("append");
            history
                .append(Message::assistant(format!("answer {turn}")))
                .expect("append");
        }

        history.prune(4);

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot[0].role, Role::System);
        assert_eq!(snapshot[1].content, "question 4");
        assert_eq!(snapshot[4].content, "answer 5");
    }

    #[test]
    fn prune_is_a_no_op_under_the_bound() {
        let mut history = History::new();
        history.append(Message::human("hi")).expect("append");
        history.prune(4);
        assert_eq!(history.len(), 1);
    }
}
