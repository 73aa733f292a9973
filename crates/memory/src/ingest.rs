//! Knowledge ingestion: turns documents into stored fragments.
//!
//! Accepted inputs:
//! - a JSON array of `{ "source": ..., "content": ..., "tags": [...] }`
//! - any other file, read as plain text (the file name becomes the source)
//! - web pages, see [`crate::web`]

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use murmur_core::error::{GenerationError, StoreError};
use murmur_core::provider::{EmbeddingRequest, Provider};
use murmur_core::store::{ContextStore, KnowledgeFragment};
use serde::Deserialize;
use tracing::{debug, info};

use crate::keywords::extract_keywords;

/// Keywords kept per fragment.
const KEYWORDS_PER_FRAGMENT: usize = 12;

/// Errors raised while ingesting knowledge.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] GenerationError),
}

/// One source document before chunking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestDocument {
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Optional embedding step for ingestion.
pub struct Embedder<'a> {
    pub provider: &'a dyn Provider,
    pub model: &'a str,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub fragments: usize,
    pub embedded: usize,
}

/// Load documents from a file.
pub fn load_documents(path: &Path) -> Result<Vec<IngestDocument>, IngestError> {
    let raw = std::fs::read_to_string(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        return serde_json::from_str(&raw).map_err(|e| IngestError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        });
    }

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(vec![IngestDocument {
        source,
        content: raw,
        tags: BTreeSet::new(),
    }])
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Paragraphs are kept together when they fit, then sentences; a single
/// sentence longer than the limit is cut on character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let pieces: Vec<String> = if paragraph.chars().count() <= max_chars {
            vec![paragraph.to_string()]
        } else {
            paragraph
                .split_inclusive(['.', '!', '?', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .flat_map(|s| hard_split(s, max_chars))
                .collect()
        };

        for piece in pieces {
            let separator = if current.is_empty() { 0 } else { 1 };
            if current.chars().count() + separator + piece.chars().count() > max_chars
                && !current.is_empty()
            {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Chunk a document into fragments with IDs `{source}#{index}`.
pub fn fragments_from_document(
    doc: &IngestDocument,
    chunk_chars: usize,
    now: DateTime<Utc>,
) -> Vec<KnowledgeFragment> {
    chunk_text(&doc.content, chunk_chars)
        .into_iter()
        .enumerate()
        .map(|(i, text)| KnowledgeFragment {
            id: format!("{}#{i}", doc.source),
            keywords: extract_keywords(&text, KEYWORDS_PER_FRAGMENT),
            text,
            tags: doc.tags.clone(),
            embedding: None,
            source: doc.source.clone(),
            ingested_at: now,
        })
        .collect()
}

/// Chunk, optionally embed, and upsert documents into the store.
pub async fn ingest_documents(
    store: &dyn ContextStore,
    docs: &[IngestDocument],
    chunk_chars: usize,
    embedder: Option<Embedder<'_>>,
    now: DateTime<Utc>,
) -> Result<IngestReport, IngestError> {
    let mut report = IngestReport::default();

    for doc in docs {
        let mut fragments = fragments_from_document(doc, chunk_chars, now);
        if fragments.is_empty() {
            debug!(source = %doc.source, "Skipping empty document");
            continue;
        }

        if let Some(embedder) = &embedder {
            let response = embedder
                .provider
                .embed(EmbeddingRequest {
                    model: embedder.model.to_string(),
                    inputs: fragments.iter().map(|f| f.text.clone()).collect(),
                })
                .await?;
            for (fragment, vector) in fragments.iter_mut().zip(response.embeddings) {
                fragment.embedding = Some(vector);
                report.embedded += 1;
            }
        }

        for fragment in &fragments {
            store.upsert_fragment(fragment).await?;
        }
        report.documents += 1;
        report.fragments += fragments.len();
        info!(source = %doc.source, fragments = fragments.len(), "Ingested document");
    }

    Ok(report)
}
