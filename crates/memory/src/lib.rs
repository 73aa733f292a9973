//! Context store implementations and knowledge ingestion for Murmur.

pub mod in_memory;
pub mod ingest;
pub mod keywords;
pub mod source;
pub mod sqlite;
pub mod vector;
pub mod web;

pub use in_memory::InMemoryStore;
pub use ingest::{
    Embedder, IngestDocument, IngestError, IngestReport, chunk_text, ingest_documents,
    load_documents,
};
pub use keywords::{extract_keywords, tokenize};
pub use source::StoreKnowledgeSource;
pub use sqlite::SqliteStore;
pub use vector::cosine_similarity;
pub use web::{WebScraper, extract_page, is_url};
