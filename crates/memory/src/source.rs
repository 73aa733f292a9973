//! The default knowledge source: fragments held by the context store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use murmur_core::error::StoreError;
use murmur_core::knowledge::{KnowledgeQuery, KnowledgeSource};
use murmur_core::store::{ContextStore, FragmentFilter, KnowledgeFragment};

/// Newest fragments scanned when the query carries an embedding.
const DEFAULT_EMBEDDING_SCAN: usize = 256;

/// Reads candidate fragments from a [`ContextStore`].
///
/// Query terms are matched against fragment text, keywords and tags. A query
/// with an embedding also pulls in the newest fragments regardless of
/// wording, so vector scoring can surface matches that share no term.
pub struct StoreKnowledgeSource {
    store: Arc<dyn ContextStore>,
    embedding_scan: usize,
}

impl StoreKnowledgeSource {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            embedding_scan: DEFAULT_EMBEDDING_SCAN,
        }
    }

    /// Bound the unfiltered scan used for embedding queries. `0` disables it.
    pub fn with_embedding_scan(mut self, fragments: usize) -> Self {
        self.embedding_scan = fragments;
        self
    }
}

#[async_trait]
impl KnowledgeSource for StoreKnowledgeSource {
    fn name(&self) -> &str {
        "store"
    }

    async fn fetch(
        &self,
        query: &KnowledgeQuery,
        limit: usize,
    ) -> Result<Vec<KnowledgeFragment>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut candidates = if query.terms.is_empty() {
            Vec::new()
        } else {
            let filter = FragmentFilter {
                terms: query.terms.clone(),
                tags: query.terms.clone(),
                limit,
            };
            self.store.query_fragments(&filter).await?
        };

        if query.embedding.is_some() && self.embedding_scan > 0 {
            let scan = FragmentFilter::default().with_limit(self.embedding_scan);
            let mut seen: HashSet<String> = candidates.iter().map(|f| f.id.clone()).collect();
            for fragment in self.store.query_fragments(&scan).await? {
                if seen.insert(fragment.id.clone()) {
                    candidates.push(fragment);
                }
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use chrono::Utc;

    fn fragment(id: &str, text: &str, tag: &str, embedding: Option<Vec<f32>>) -> KnowledgeFragment {
        KnowledgeFragment {
            id: id.into(),
            text: text.into(),
            tags: [tag.to_string()].into(),
            keywords: crate::keywords::extract_keywords(text, 8),
            embedding,
            source: "kb".into(),
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn embedding_query_reaches_fragments_without_shared_terms() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_fragment(&fragment(
                "v",
                "Validators earn yield every epoch",
                "consensus",
                Some(vec![1.0, 0.0]),
            ))
            .await
            .unwrap();

        let mut query = KnowledgeQuery {
            text: "staking payout schedule".into(),
            terms: vec!["staking".into(), "payout".into(), "schedule".into()],
            embedding: None,
        };
        let source = StoreKnowledgeSource::new(store.clone());
        assert!(source.fetch(&query, 10).await.unwrap().is_empty());

        query.embedding = Some(vec![2.0, 0.0]);
        let hits = source.fetch(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "v");

        let lexical_only = StoreKnowledgeSource::new(store).with_embedding_scan(0);
        assert!(lexical_only.fetch(&query, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetches_by_term_or_tag() {
        let store = Arc::new(InMemoryStore::new());
        for (id, text, tag) in [
            ("a", "Staking rewards are paid weekly", "staking"),
            ("b", "The roadmap targets a Q3 mainnet", "roadmap"),
        ] {
            store
                .upsert_fragment(&KnowledgeFragment {
                    id: id.into(),
                    text: text.into(),
                    tags: [tag.to_string()].into(),
                    keywords: crate::keywords::extract_keywords(text, 8),
                    embedding: None,
                    source: "kb".into(),
                    ingested_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let source = StoreKnowledgeSource::new(store);
        let query = KnowledgeQuery {
            text: "any roadmap news?".into(),
            terms: vec!["roadmap".into(), "news".into()],
            embedding: None,
        };
        let hits = source.fetch(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert!(source.fetch(&query, 0).await.unwrap().is_empty());
    }
}
