use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TOKEN_LIMIT;

/// Ends a reply before the model starts writing the user's next turn.
pub const STOP_SEQUENCE: &str = "\nUser:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub token_limit: u32,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            token_limit: TOKEN_LIMIT,
            created_at: Utc::now(),
        }
    }
}

/// Append-only conversation log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// History as `User:` / `Assistant:` lines, then the new turn left open for the model.
    pub fn render_prompt(&self, user_text: &str) -> String {
        let mut prompt = String::new();
        for message in &self.messages {
            prompt.push_str(&format!("{}: {}\n", message.role, message.text));
        }
        prompt.push_str(&format!("{}: {user_text}\n{}:", Role::User, Role::Assistant));
        prompt
    }
}
