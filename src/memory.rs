use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::message::{Message, Role};

pub const DEFAULT_MAX_HISTORY: usize = 50;
/// Smallest usable bound: the system message plus one turn message.
pub const MIN_MAX_HISTORY: usize = 2;

/// Bounded, role-tagged transcript.
///
/// Index 0 always holds the single system message. Once the transcript grows
/// past `max_history` entries the oldest non-system messages are dropped first,
/// survivors keep their relative order.
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_history: usize,
    session_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

impl ConversationMemory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self::with_max_history(system_prompt, DEFAULT_MAX_HISTORY)
    }

    /// `max_history` below [`MIN_MAX_HISTORY`] is raised to it with a warning.
    /// Configuration rejects such values before they get here.
    pub fn with_max_history(system_prompt: impl Into<String>, max_history: usize) -> Self {
        if max_history < MIN_MAX_HISTORY {
            tracing::warn!(
                requested = max_history,
                used = MIN_MAX_HISTORY,
                "max_history too small for a system message plus a turn"
            );
        }
        Self {
            messages: vec![Message::system(system_prompt)],
            max_history: max_history.max(MIN_MAX_HISTORY),
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    /// Append a message and return its index after eviction.
    ///
    /// System messages are never appended past index 0; a `Role::System` push
    /// replaces the existing system prompt instead.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> usize {
        if role == Role::System {
            self.messages[0] = Message::system(content);
            return 0;
        }
        self.messages.push(Message::new(role, content));
        if self.messages.len() > self.max_history {
            let overflow = self.messages.len() - self.max_history;
            self.messages.drain(1..1 + overflow);
        }
        self.messages.len() - 1
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> usize {
        self.push(Role::User, content)
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> usize {
        self.push(Role::Assistant, content)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + '_ {
        self.messages.iter()
    }

    /// Copy of the transcript with `context` appended to the system message.
    pub fn snapshot_with_context(&self, context: Option<&str>) -> Vec<Message> {
        let mut snapshot = self.messages.clone();
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            snapshot[0].content.push_str(context);
        }
        snapshot
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// Drop the history, keeping the system message.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.to_string(),
            created_at: self.created_at,
            message_count: self.messages.len() - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_non_system_messages() {
        let mut memory = ConversationMemory::with_max_history("You are a helpful assistant", 6);
        for i in 0..11 {
            memory.push_user(format!("message {i}"));
        }

        assert_eq!(memory.len(), 6);
        assert_eq!(memory.messages()[0].role, Role::System);
        assert_eq!(memory.system_prompt(), "You are a helpful assistant");
        let contents: Vec<&str> = memory.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["message 6", "message 7", "message 8", "message 9", "message 10"]
        );
    }

    #[test]
    fn system_push_replaces_prompt() {
        let mut memory = ConversationMemory::new("first");
        memory.push_user("hi");
        assert_eq!(memory.push(Role::System, "second"), 0);
        assert_eq!(memory.system_prompt(), "second");
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn snapshot_context_does_not_touch_stored_prompt() {
        let mut memory = ConversationMemory::new("base");
        memory.push_assistant("ok");
        let snapshot = memory.snapshot_with_context(Some("\n\nSCOPE"));
        assert_eq!(snapshot[0].content, "base\n\nSCOPE");
        assert_eq!(memory.system_prompt(), "base");
    }

    #[test]
    fn clear_keeps_system_message() {
        let mut memory = ConversationMemory::new("base");
        memory.push_user("a");
        memory.push_assistant("b");
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.session_info().message_count, 0);
    }
}
