//! Context store trait: persistence for conversation history and knowledge.
//!
//! The store holds two collections:
//! - messages, unique per `(channel_id, id)`, read back as chronological windows
//! - knowledge fragments, written by ingestion and read by retrieval
//!
//! Implementations must be safe for concurrent use from every channel task.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::error::StoreError;
use crate::message::{ConversationWindow, Message};

/// A unit of knowledge the agent can cite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFragment {
    /// Stable ID (ingestion derives it from source and chunk index)
    pub id: String,

    /// The text shown to the model
    pub text: String,

    /// Free-form labels used for filtering and tag overlap scoring
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Normalized keywords extracted at ingestion time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Optional embedding vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Where the fragment came from (file name, URL, collection)
    pub source: String,

    /// When the fragment was ingested
    pub ingested_at: DateTime<Utc>,
}

/// A candidate query against stored fragments.
///
/// A fragment matches when it shares at least one term with `terms`
/// (keywords or text) or one tag with `tags`. Empty `terms` and `tags`
/// match everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentFilter {
    /// Normalized query terms
    #[serde(default)]
    pub terms: Vec<String>,

    /// Tags to match
    #[serde(default)]
    pub tags: Vec<String>,

    /// Maximum number of candidates
    #[serde(default = "default_candidate_limit")]
    pub limit: usize,
}

fn default_candidate_limit() -> usize {
    64
}

impl Default for FragmentFilter {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            tags: Vec::new(),
            limit: default_candidate_limit(),
        }
    }
}

impl FragmentFilter {
    pub fn terms(terms: Vec<String>) -> Self {
        Self {
            terms,
            tags: Vec::new(),
            limit: default_candidate_limit(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub messages: usize,
    pub fragments: usize,
    pub channels: usize,
}

/// The core ContextStore trait.
///
/// Implementations: SQLite (production) and in-memory (tests, ephemeral runs).
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert a message. Idempotent on `(channel_id, id)`: returns `false`
    /// and leaves the stored row untouched when it already exists.
    async fn insert_message(&self, message: &Message) -> std::result::Result<bool, StoreError>;

    /// The newest `limit` messages of a channel, oldest first.
    async fn recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Look up one message.
    async fn get_message(
        &self,
        channel: &ChannelId,
        id: &str,
    ) -> std::result::Result<Option<Message>, StoreError>;

    /// Whether an agent-authored message already replies to `trigger_id`.
    async fn has_agent_reply(
        &self,
        channel: &ChannelId,
        trigger_id: &str,
    ) -> std::result::Result<bool, StoreError>;

    /// ID of the newest stored message in a channel (the poll cursor).
    async fn latest_message_id(
        &self,
        channel: &ChannelId,
    ) -> std::result::Result<Option<String>, StoreError>;

    /// Insert or replace a knowledge fragment by ID.
    async fn upsert_fragment(
        &self,
        fragment: &KnowledgeFragment,
    ) -> std::result::Result<(), StoreError>;

    /// Candidate fragments for a filter. Unranked; scoring is the retriever's job.
    async fn query_fragments(
        &self,
        filter: &FragmentFilter,
    ) -> std::result::Result<Vec<KnowledgeFragment>, StoreError>;

    /// Delete messages older than `before`. Returns how many were removed.
    async fn prune_messages(&self, before: DateTime<Utc>) -> std::result::Result<usize, StoreError>;

    /// Row counts.
    async fn stats(&self) -> std::result::Result<StoreStats, StoreError>;

    /// The conversation window for a channel: a pure read over the store.
    async fn window(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> std::result::Result<ConversationWindow, StoreError> {
        let messages = self.recent_messages(channel, limit).await?;
        Ok(ConversationWindow::from_messages(channel.clone(), limit, messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_filter_defaults() {
        let filter: FragmentFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter.limit, 64);
        assert!(filter.terms.is_empty());
        assert_eq!(FragmentFilter::terms(vec!["rust".into()]).with_limit(5).limit, 5);
    }

    #[test]
    fn fragment_serialization_omits_missing_embedding() {
        let fragment = KnowledgeFragment {
            id: "faq#0".into(),
            text: "Staking rewards are paid weekly.".into(),
            tags: BTreeSet::from(["staking".to_string()]),
            keywords: vec!["staking".into(), "rewards".into()],
            embedding: None,
            source: "faq.md".into(),
            ingested_at: Utc::now(),
        };
        let json = serde_json::to_string(&fragment).unwrap();
        assert!(json.contains("staking"));
        assert!(!json.contains("embedding"));
    }
}
