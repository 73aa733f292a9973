//! Chat transport trait: the abstraction over the chat platform.
//!
//! A transport fetches new messages from a monitored channel and posts the
//! agent's replies. The Discord REST adapter lives in `murmur-channels`;
//! tests use scripted in-memory transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::Message;

/// Platform identifier of a monitored channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The core transport trait.
///
/// Implementations handle platform-specific request formatting, rate-limit
/// signalling and authentication. Errors are per call; a failing channel
/// never affects other channels.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Human-readable transport name (e.g., "discord").
    fn name(&self) -> &str;

    /// Fetch messages newer than `since` (a message ID), in arrival order.
    ///
    /// With `since = None` the transport returns the most recent page.
    async fn fetch_new_messages(
        &self,
        channel: &ChannelId,
        since: Option<&str>,
    ) -> std::result::Result<Vec<Message>, TransportError>;

    /// Post `content` to the channel, optionally as a reply to `reply_to`.
    ///
    /// Returns the message as stored by the platform.
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<Message, TransportError>;

    /// Health check: are the credentials valid and the platform reachable?
    async fn health_check(&self) -> std::result::Result<bool, TransportError> {
        Ok(true)
    }
}
