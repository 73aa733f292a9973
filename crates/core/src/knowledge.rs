//! Knowledge sources: pluggable providers of candidate fragments.
//!
//! The retriever asks every registered source for candidates and ranks the
//! union itself. The default source reads the context store; additional
//! sources (static files, remote APIs) are composed at startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::KnowledgeFragment;

/// What the retriever is looking for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    /// The raw query text
    pub text: String,

    /// Normalized keywords extracted from `text`
    #[serde(default)]
    pub terms: Vec<String>,

    /// Query embedding, when the embedding strategy is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A provider of candidate knowledge fragments.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Unique source name (e.g., "store", "static").
    fn name(&self) -> &str;

    /// Up to `limit` candidate fragments for the query, in any order.
    async fn fetch(
        &self,
        query: &KnowledgeQuery,
        limit: usize,
    ) -> std::result::Result<Vec<KnowledgeFragment>, StoreError>;
}

/// The set of sources the retriever consults, in registration order.
#[derive(Clone, Default)]
pub struct KnowledgeSourceRegistry {
    sources: Vec<Arc<dyn KnowledgeSource>>,
}

impl KnowledgeSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Replaces any existing source with the same name.
    pub fn register(&mut self, source: Arc<dyn KnowledgeSource>) {
        match self.sources.iter().position(|s| s.name() == source.name()) {
            Some(idx) => self.sources[idx] = source,
            None => self.sources.push(source),
        }
    }

    pub fn with(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn KnowledgeSource>> {
        self.sources.iter().find(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn KnowledgeSource>> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
