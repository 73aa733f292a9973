//! Message and conversation-window domain types.
//!
//! A [`Message`] is what the chat platform delivers and what the store keeps.
//! A [`ConversationWindow`] is the bounded, chronological slice of one
//! channel's history that the pipeline reasons over. [`PromptMessage`] is
//! the role-tagged text sent to the generative backend.

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// A chat message observed in (or sent to) a monitored channel.
///
/// Immutable once stored; uniquely identified by `(channel_id, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform message ID (a Discord snowflake)
    pub id: String,

    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Platform user ID of the author
    pub author_id: String,

    /// Display name of the author, if the platform supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// The text content
    pub content: String,

    /// When the platform recorded the message
    pub timestamp: DateTime<Utc>,

    /// ID of the message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,

    /// Whether the agent itself authored this message
    #[serde(default)]
    pub is_from_agent: bool,
}

impl Message {
    /// Create an observed (non-agent) message.
    pub fn new(
        id: impl Into<String>,
        channel_id: ChannelId,
        author_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id,
            author_id: author_id.into(),
            author_name: None,
            content: content.into(),
            timestamp,
            reply_to_id: None,
            is_from_agent: false,
        }
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    pub fn replying_to(mut self, parent_id: impl Into<String>) -> Self {
        self.reply_to_id = Some(parent_id.into());
        self
    }

    pub fn from_agent(mut self) -> Self {
        self.is_from_agent = true;
        self
    }

    /// Name to show in a transcript: the display name, else the user ID.
    pub fn display_author(&self) -> &str {
        self.author_name.as_deref().unwrap_or(&self.author_id)
    }

    /// Arrival order. Snowflakes grow monotonically, so a longer ID is newer
    /// and equal-length IDs compare lexically; timestamps break the
    /// remaining ties for non-numeric IDs.
    pub fn arrival_cmp(&self, other: &Self) -> Ordering {
        compare_snowflakes(&self.id, &other.id).then(self.timestamp.cmp(&other.timestamp))
    }
}

/// Compare two platform IDs as unsigned integers without parsing them.
pub fn compare_snowflakes(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// The most recent messages of one channel, oldest first.
///
/// Never holds more than `limit` entries; pushing past the limit evicts the
/// oldest message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationWindow {
    channel_id: ChannelId,
    limit: usize,
    messages: VecDeque<Message>,
}

impl ConversationWindow {
    pub fn new(channel_id: ChannelId, limit: usize) -> Self {
        Self {
            channel_id,
            limit,
            messages: VecDeque::with_capacity(limit),
        }
    }

    /// Build a window from messages in any order, keeping the newest `limit`.
    pub fn from_messages(
        channel_id: ChannelId,
        limit: usize,
        messages: impl IntoIterator<Item = Message>,
    ) -> Self {
        let mut sorted: Vec<Message> = messages.into_iter().collect();
        sorted.sort_by(Message::arrival_cmp);
        let mut window = Self::new(channel_id, limit);
        for message in sorted {
            window.push(message);
        }
        window
    }

    /// Append a message, evicting the oldest entry when full.
    pub fn push(&mut self, message: Message) {
        if self.limit == 0 {
            return;
        }
        while self.messages.len() >= self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator {
        self.messages.iter()
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.back()
    }
}

/// The role of a prompt segment sent to the generative backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions: personality, knowledge, rules
    System,
    /// The conversation the agent should answer
    User,
    /// Text the agent produced earlier
    Assistant,
}

/// A role-tagged piece of prompt text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
