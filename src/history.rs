//! Ordered chat log for a single session.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
}

/// A single chat turn. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub ordinal: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only log of messages with monotonically increasing ordinals.
///
/// Ordinals start at zero and restart at zero after [`MessageHistory::clear`].
#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
    next_ordinal: u64,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its ordinal.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.messages.push(Message {
            ordinal,
            role,
            content: content.into(),
            created_at: Utc::now(),
        });
        ordinal
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_ordinal = 0;
    }
}
