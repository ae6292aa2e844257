//! Message and Conversation domain types.
//!
//! A [`Conversation`] is the ordered history sent to the endpoint on every
//! turn. It only grows, except for [`Conversation::compact`], which drops the
//! oldest turns while keeping the seed messages intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fixed instructions at the head of the conversation
    System,
    /// The caller (the original query and synthetic prompts)
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// The ordered message history of one session.
///
/// The first message is always the system prompt. Messages are never
/// reordered or edited after they are pushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    messages: Vec<Message>,

    /// Number of leading messages [`compact`](Self::compact) never drops.
    seed_len: usize,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation whose first message is `system_prompt`.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: vec![Message::system(system_prompt)],
            seed_len: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Mark everything pushed so far as seed material (system prompt, query,
    /// priming acknowledgment).
    pub fn seal_seed(&mut self) {
        self.seed_len = self.messages.len();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop the oldest non-seed messages so at most `keep_recent` remain after
    /// the seed. Returns how many messages were removed.
    pub fn compact(&mut self, keep_recent: usize) -> usize {
        let turns = self.messages.len() - self.seed_len;
        if turns <= keep_recent {
            return 0;
        }
        let excess = turns - keep_recent;
        self.messages.drain(self.seed_len..self.seed_len + excess);
        self.updated_at = Utc::now();
        excess
    }

    /// A copy of the messages as they would be sent with a history window
    /// applied. The conversation itself is left untouched.
    pub fn windowed(&self, keep_recent: Option<usize>) -> Vec<Message> {
        match keep_recent {
            Some(keep) => {
                let mut copy = self.clone();
                copy.compact(keep);
                copy.messages
            }
            None => self.messages.clone(),
        }
    }
}
