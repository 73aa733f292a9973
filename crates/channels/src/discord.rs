//! Discord transport over the REST API.
//!
//! Polls `GET /channels/{id}/messages` with an `after` cursor and posts
//! replies with `POST /channels/{id}/messages` carrying a
//! `message_reference`. The configured token is sent verbatim as the
//! `Authorization` header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::channel::{ChannelId, ChatTransport};
use murmur_core::error::TransportError;
use murmur_core::message::Message;
use serde::Deserialize;
use tracing::{debug, warn};

/// The platform caps a page at 100 messages.
const MAX_FETCH_LIMIT: u32 = 100;

/// Retry hint used when a 429 body carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Per-request timeout for every REST call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Build the HTTP client; a client without its timeout is never used.
fn http_client(timeout: std::time::Duration) -> std::result::Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::NotConfigured(format!("HTTP client setup failed: {e}")))
}

/// Discord REST transport.
pub struct DiscordTransport {
    api_base: String,
    token: String,
    my_user_id: String,
    fetch_limit: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for DiscordTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordTransport")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .field("my_user_id", &self.my_user_id)
            .field("fetch_limit", &self.fetch_limit)
            .finish()
    }
}

impl DiscordTransport {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        my_user_id: impl Into<String>,
    ) -> std::result::Result<Self, TransportError> {
        let client = http_client(REQUEST_TIMEOUT)?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            my_user_id: my_user_id.into(),
            fetch_limit: MAX_FETCH_LIMIT,
            client,
        })
    }

    /// Build from the `[discord]` section and the agent's own user ID.
    pub fn from_config(
        config: &murmur_config::DiscordConfig,
        my_user_id: &str,
    ) -> std::result::Result<Self, TransportError> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| TransportError::NotConfigured("discord token missing".into()))?;
        Ok(Self::new(&config.api_base, token, my_user_id)?.with_fetch_limit(config.fetch_limit))
    }

    pub fn with_fetch_limit(mut self, limit: u32) -> Self {
        self.fetch_limit = limit.clamp(1, MAX_FETCH_LIMIT);
        self
    }

    fn messages_url(&self, channel: &ChannelId) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel)
    }

    /// Convert a wire message into the domain type.
    fn to_message(&self, api: ApiMessage) -> Message {
        let is_from_agent = api.author.id == self.my_user_id;
        Message {
            id: api.id,
            channel_id: ChannelId(api.channel_id),
            author_name: api
                .author
                .global_name
                .or(Some(api.author.username))
                .filter(|name| !name.is_empty()),
            author_id: api.author.id,
            content: api.content,
            timestamp: api.timestamp,
            reply_to_id: api.message_reference.and_then(|r| r.message_id),
            is_from_agent,
        }
    }

    async fn error_for(
        &self,
        channel: &ChannelId,
        response: reqwest::Response,
    ) -> TransportError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(channel = %channel, status, body = %body, "Discord request failed");
        map_status(channel, status, &body)
    }
}

/// Map a non-success HTTP status to a transport error.
fn map_status(channel: &ChannelId, status: u16, body: &str) -> TransportError {
    if status == 429 {
        let retry_after_secs = serde_json::from_str::<RateLimitBody>(body)
            .ok()
            .map(|b| b.retry_after.ceil() as u64)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return TransportError::RateLimited { retry_after_secs };
    }
    TransportError::RequestFailed {
        channel: channel.to_string(),
        status,
        message: body.to_string(),
    }
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    fn name(&self) -> &str {
        "discord"
    }

    async fn fetch_new_messages(
        &self,
        channel: &ChannelId,
        since: Option<&str>,
    ) -> std::result::Result<Vec<Message>, TransportError> {
        let mut query = vec![("limit", self.fetch_limit.to_string())];
        if let Some(after) = since {
            query.push(("after", after.to_string()));
        }

        let response = self
            .client
            .get(self.messages_url(channel))
            .header("Authorization", &self.token)
            .query(&query)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.error_for(channel, response).await);
        }

        let page: Vec<ApiMessage> = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

        // Pages arrive newest first
        let mut messages: Vec<Message> = page.into_iter().map(|m| self.to_message(m)).collect();
        messages.sort_by(Message::arrival_cmp);

        debug!(channel = %channel, count = messages.len(), after = ?since, "Fetched messages");
        Ok(messages)
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<Message, TransportError> {
        let body = send_payload(channel, content, reply_to);

        let response = self
            .client
            .post(self.messages_url(channel))
            .header("Authorization", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::DeliveryFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(match self.error_for(channel, response).await {
                TransportError::RequestFailed {
                    channel, message, ..
                } => TransportError::DeliveryFailed {
                    channel,
                    reason: message,
                },
                other => other,
            });
        }

        let sent: ApiMessage = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

        debug!(channel = %channel, message_id = %sent.id, reply_to = ?reply_to, "Message sent");
        Ok(self.to_message(sent))
    }

    async fn health_check(&self) -> std::result::Result<bool, TransportError> {
        let response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let me: ApiUser = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        if me.id != self.my_user_id {
            warn!(token_user = %me.id, configured = %self.my_user_id, "Token belongs to a different user");
        }
        Ok(true)
    }
}

fn send_payload(channel: &ChannelId, content: &str, reply_to: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({ "content": content });
    if let Some(parent) = reply_to {
        body["message_reference"] = serde_json::json!({
            "message_id": parent,
            "channel_id": channel.as_str(),
        });
    }
    body
}

// --- Discord API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    channel_id: String,
    author: ApiUser,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    message_reference: Option<ApiMessageReference>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessageReference {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}
