//! In-memory store: useful for testing and ephemeral sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::channel::ChannelId;
use murmur_core::error::StoreError;
use murmur_core::message::{Message, compare_snowflakes};
use murmur_core::store::{ContextStore, FragmentFilter, KnowledgeFragment, StoreStats};
use tokio::sync::RwLock;

use crate::keywords::tokenize;

/// A context store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// Per channel, messages keyed by ID
    messages: Arc<RwLock<HashMap<ChannelId, BTreeMap<String, Message>>>>,
    fragments: Arc<RwLock<BTreeMap<String, KnowledgeFragment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether a fragment satisfies a candidate filter.
fn fragment_matches(fragment: &KnowledgeFragment, filter: &FragmentFilter) -> bool {
    if filter.terms.is_empty() && filter.tags.is_empty() {
        return true;
    }
    if filter.tags.iter().any(|t| fragment.tags.contains(t)) {
        return true;
    }
    let text_tokens = tokenize(&fragment.text);
    filter
        .terms
        .iter()
        .any(|term| fragment.keywords.contains(term) || text_tokens.contains(term))
}

fn sorted_by_arrival(channel: &BTreeMap<String, Message>) -> Vec<&Message> {
    let mut all: Vec<&Message> = channel.values().collect();
    all.sort_by(|a, b| a.arrival_cmp(b));
    all
}

#[async_trait]
impl ContextStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError> {
        let mut messages = self.messages.write().await;
        let channel = messages.entry(message.channel_id.clone()).or_default();
        if channel.contains_key(&message.id) {
            return Ok(false);
        }
        channel.insert(message.id.clone(), message.clone());
        Ok(true)
    }

    async fn recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let Some(stored) = messages.get(channel) else {
            return Ok(Vec::new());
        };
        let all = sorted_by_arrival(stored);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).cloned().collect())
    }

    async fn get_message(
        &self,
        channel: &ChannelId,
        id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.get(channel).and_then(|c| c.get(id)).cloned())
    }

    async fn has_agent_reply(
        &self,
        channel: &ChannelId,
        trigger_id: &str,
    ) -> Result<bool, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.get(channel).is_some_and(|c| {
            c.values()
                .any(|m| m.is_from_agent && m.reply_to_id.as_deref() == Some(trigger_id))
        }))
    }

    async fn latest_message_id(&self, channel: &ChannelId) -> Result<Option<String>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.get(channel).and_then(|c| {
            c.keys()
                .max_by(|a, b| compare_snowflakes(a, b))
                .cloned()
        }))
    }

    async fn upsert_fragment(&self, fragment: &KnowledgeFragment) -> Result<(), StoreError> {
        self.fragments
            .write()
            .await
            .insert(fragment.id.clone(), fragment.clone());
        Ok(())
    }

    async fn query_fragments(
        &self,
        filter: &FragmentFilter,
    ) -> Result<Vec<KnowledgeFragment>, StoreError> {
        let fragments = self.fragments.read().await;
        let mut matched: Vec<KnowledgeFragment> = fragments
            .values()
            .filter(|f| fragment_matches(f, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at).then(a.id.cmp(&b.id)));
        matched.truncate(filter.limit);
        Ok(matched)
    }

    async fn prune_messages(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut messages = self.messages.write().await;
        let mut removed = 0;
        for channel in messages.values_mut() {
            let len_before = channel.len();
            channel.retain(|_, m| m.timestamp >= before);
            removed += len_before - channel.len();
        }
        messages.retain(|_, c| !c.is_empty());
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let messages = self.messages.read().await;
        Ok(StoreStats {
            messages: messages.values().map(BTreeMap::len).sum(),
            fragments: self.fragments.read().await.len(),
            channels: messages.len(),
        })
    }
}
