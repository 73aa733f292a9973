//! Knowledge retrieval: rank fragments from every registered source.
//!
//! Candidates are gathered from each [`KnowledgeSource`] in the registry,
//! de-duplicated by fragment ID, scored by a pluggable [`RelevanceScorer`],
//! filtered by a minimum relevance, and ordered by:
//!
//! 1. score, descending
//! 2. ingestion time, newest first
//! 3. fragment ID
//!
//! Retrieval never fails: a source error is logged and that source skipped.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use murmur_config::{RetrievalConfig, ScoringStrategy};
use murmur_core::knowledge::{KnowledgeQuery, KnowledgeSourceRegistry};
use murmur_core::message::PromptMessage;
use murmur_core::provider::{EmbeddingRequest, Provider, ProviderRequest};
use murmur_core::store::KnowledgeFragment;
use murmur_memory::{cosine_similarity, tokenize};
use tracing::{debug, warn};

/// Candidates requested from each source, at minimum.
const MIN_CANDIDATES: usize = 32;

/// A fragment together with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFragment {
    pub fragment: KnowledgeFragment,
    pub score: f32,
}

/// Scores one fragment against a query. Higher is more relevant.
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, query: &KnowledgeQuery, fragment: &KnowledgeFragment) -> f32;
}

/// Fraction of distinct query terms found in the fragment's keywords,
/// text, or tags. Range `[0, 1]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordOverlapScorer;

impl RelevanceScorer for KeywordOverlapScorer {
    fn name(&self) -> &str {
        "keyword"
    }

    fn score(&self, query: &KnowledgeQuery, fragment: &KnowledgeFragment) -> f32 {
        let terms: BTreeSet<&str> = query.terms.iter().map(String::as_str).collect();
        if terms.is_empty() {
            return 0.0;
        }

        let mut vocabulary: HashSet<String> = tokenize(&fragment.text).into_iter().collect();
        vocabulary.extend(fragment.keywords.iter().cloned());
        vocabulary.extend(fragment.tags.iter().map(|t| t.to_lowercase()));

        let hits = terms.iter().filter(|t| vocabulary.contains(**t)).count();
        hits as f32 / terms.len() as f32
    }
}

/// Cosine similarity between query and fragment embeddings.
///
/// Falls back to keyword overlap when either side has no embedding.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddingScorer {
    fallback: KeywordOverlapScorer,
}

impl RelevanceScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        "embedding"
    }

    fn score(&self, query: &KnowledgeQuery, fragment: &KnowledgeFragment) -> f32 {
        match (&query.embedding, &fragment.embedding) {
            (Some(q), Some(f)) => cosine_similarity(q, f),
            _ => self.fallback.score(query, fragment),
        }
    }
}

struct ModelHandle {
    provider: Arc<dyn Provider>,
    model: String,
}

/// Ranks knowledge fragments for a query.
pub struct KnowledgeRetriever {
    sources: KnowledgeSourceRegistry,
    scorer: Arc<dyn RelevanceScorer>,
    min_relevance: f32,
    embedder: Option<ModelHandle>,
    refiner: Option<ModelHandle>,
}

impl KnowledgeRetriever {
    /// A retriever using keyword overlap and no relevance floor.
    pub fn new(sources: KnowledgeSourceRegistry) -> Self {
        Self {
            sources,
            scorer: Arc::new(KeywordOverlapScorer),
            min_relevance: 0.0,
            embedder: None,
            refiner: None,
        }
    }

    /// Build from configuration. `provider` is used for query embeddings
    /// (embedding strategy) and query refinement (when enabled).
    pub fn from_config(
        sources: KnowledgeSourceRegistry,
        config: &RetrievalConfig,
        provider: Arc<dyn Provider>,
        model: &str,
    ) -> Self {
        let mut retriever = Self::new(sources).with_min_relevance(config.min_relevance);
        if config.strategy == ScoringStrategy::Embedding {
            retriever = retriever
                .with_scorer(Arc::new(EmbeddingScorer::default()))
                .with_query_embeddings(Arc::clone(&provider), config.embedding_model.clone());
        }
        if config.refine_query {
            retriever = retriever.with_query_refinement(provider, model);
        }
        retriever
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Fragments must score strictly above this value.
    pub fn with_min_relevance(mut self, min_relevance: f32) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    pub fn with_query_embeddings(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        self.embedder = Some(ModelHandle {
            provider,
            model: model.into(),
        });
        self
    }

    /// Let the backend rewrite the query into a few search keywords first.
    pub fn with_query_refinement(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        self.refiner = Some(ModelHandle {
            provider,
            model: model.into(),
        });
        self
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Retrieve at most `limit` fragments relevant to `text`.
    pub async fn retrieve(&self, text: &str, limit: usize) -> Vec<RankedFragment> {
        if limit == 0 {
            return Vec::new();
        }
        let query = self.build_query(text).await;
        self.retrieve_query(&query, limit).await
    }

    /// Retrieve with a prepared query.
    pub async fn retrieve_query(&self, query: &KnowledgeQuery, limit: usize) -> Vec<RankedFragment> {
        if limit == 0 {
            return Vec::new();
        }

        let per_source = limit.max(MIN_CANDIDATES);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for source in self.sources.iter() {
            match source.fetch(query, per_source).await {
                Ok(fragments) => {
                    for fragment in fragments {
                        if seen.insert(fragment.id.clone()) {
                            candidates.push(fragment);
                        }
                    }
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Knowledge source failed, skipping");
                }
            }
        }

        let ranked = self.rank(query, candidates, limit);
        debug!(
            scorer = self.scorer.name(),
            results = ranked.len(),
            "Knowledge retrieved"
        );
        ranked
    }

    /// Score, filter, order and truncate candidates.
    pub fn rank(
        &self,
        query: &KnowledgeQuery,
        candidates: Vec<KnowledgeFragment>,
        limit: usize,
    ) -> Vec<RankedFragment> {
        let mut ranked: Vec<RankedFragment> = candidates
            .into_iter()
            .map(|fragment| RankedFragment {
                score: self.scorer.score(query, &fragment),
                fragment,
            })
            .filter(|r| r.score > self.min_relevance)
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.fragment.ingested_at.cmp(&a.fragment.ingested_at))
                .then_with(|| a.fragment.id.cmp(&b.fragment.id))
        });
        ranked.truncate(limit);
        ranked
    }

    async fn build_query(&self, text: &str) -> KnowledgeQuery {
        let search_text = match &self.refiner {
            Some(refiner) => refine(refiner, text).await,
            None => text.to_string(),
        };

        let mut terms = Vec::new();
        let mut seen = HashSet::new();
        for token in tokenize(&search_text) {
            if seen.insert(token.clone()) {
                terms.push(token);
            }
        }

        let embedding = match &self.embedder {
            Some(embedder) => embed_query(embedder, &search_text).await,
            None => None,
        };

        KnowledgeQuery {
            text: search_text,
            terms,
            embedding,
        }
    }
}

async fn refine(refiner: &ModelHandle, text: &str) -> String {
    let prompt = format!(
        "Based on the user's message, what is the core topic or question?\n\
         Write a search query of 3-5 keywords for finding relevant documents in a knowledge base. \
         Reply with the keywords only.\n\n\
         User message: \"{text}\"\n\nSearch query:"
    );
    let request = ProviderRequest::new(&refiner.model, vec![PromptMessage::user(prompt)])
        .with_temperature(0.0)
        .with_max_tokens(32);

    match refiner.provider.complete(request).await {
        Ok(response) if !response.content.trim().is_empty() => {
            let refined = response.content.trim().to_string();
            debug!(query = %refined, "Refined search query");
            refined
        }
        Ok(_) => text.to_string(),
        Err(e) => {
            warn!(error = %e, "Query refinement failed, using raw text");
            text.to_string()
        }
    }
}

async fn embed_query(embedder: &ModelHandle, text: &str) -> Option<Vec<f32>> {
    let request = EmbeddingRequest {
        model: embedder.model.clone(),
        inputs: vec![text.to_string()],
    };
    match embedder.provider.embed(request).await {
        Ok(response) => response.embeddings.into_iter().next(),
        Err(e) => {
            warn!(error = %e, "Query embedding failed, falling back to keywords");
            None
        }
    }
}
