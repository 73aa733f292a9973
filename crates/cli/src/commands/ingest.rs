//! `murmur ingest`: load knowledge documents and web pages into the store.

use std::path::Path;

use murmur_config::ScoringStrategy;
use murmur_memory::{
    Embedder, IngestDocument, WebScraper, ingest_documents, is_url, load_documents,
};

pub async fn run(
    explicit: Option<&Path>,
    sources: &[String],
    tags: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_unvalidated(explicit).map_err(|e| format!("Failed to load config: {e}"))?;

    let (urls, files) = split_sources(sources, &config.retrieval.base_urls);
    if urls.is_empty() && files.is_empty() {
        return Err("nothing to ingest: pass files or URLs, or set retrieval.base_urls".into());
    }

    let mut docs = Vec::new();
    for file in &files {
        let loaded = load_documents(Path::new(file))?;
        println!("  📄 {file}: {} document(s)", loaded.len());
        docs.extend(loaded);
    }
    if !urls.is_empty() {
        let (pages, failures) = WebScraper::new()?.fetch_all(&urls).await;
        for page in &pages {
            println!("  🌐 {}: {} chars", page.source, page.content.len());
        }
        for failure in &failures {
            println!("  ⚠️  {failure}");
        }
        docs.extend(pages);
    }
    if docs.is_empty() {
        return Err("no documents could be loaded".into());
    }
    apply_tags(&mut docs, tags);

    let store = super::open_store(&config.memory).await?;

    // Embeddings are only worth computing when retrieval will use them
    let provider = match config.retrieval.strategy {
        ScoringStrategy::Embedding => Some(murmur_providers::build_from_config(&config.provider)?),
        ScoringStrategy::Keyword => None,
    };
    let embedder = provider.as_deref().map(|provider| Embedder {
        provider,
        model: &config.retrieval.embedding_model,
    });

    let report = ingest_documents(
        store.as_ref(),
        &docs,
        config.retrieval.chunk_chars,
        embedder,
        chrono::Utc::now(),
    )
    .await?;

    println!(
        "\n✅ Ingested {} document(s) into {} fragment(s) ({} embedded) in the '{}' store",
        report.documents,
        report.fragments,
        report.embedded,
        store.name()
    );
    if config.memory.backend == "in_memory" {
        println!("⚠️  The in_memory backend does not persist; set memory.backend = \"sqlite\"");
    }

    Ok(())
}

/// Split sources into URLs and file paths, adding configured URLs once.
fn split_sources(sources: &[String], base_urls: &[String]) -> (Vec<String>, Vec<String>) {
    let mut urls: Vec<String> = Vec::new();
    let mut files = Vec::new();
    for source in sources.iter().chain(base_urls) {
        let source = source.trim();
        if source.is_empty() {
            continue;
        }
        if is_url(source) {
            if !urls.iter().any(|u| u == source) {
                urls.push(source.to_string());
            }
        } else {
            files.push(source.to_string());
        }
    }
    (urls, files)
}

/// Add command-line tags to every document.
fn apply_tags(docs: &mut [IngestDocument], tags: &[String]) {
    for doc in docs {
        doc.tags.extend(
            tags.iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::store::{ContextStore, FragmentFilter};

    #[test]
    fn extra_tags_are_normalized_and_merged() {
        let mut docs = vec![IngestDocument {
            source: "faq".into(),
            content: "bridges".into(),
            tags: ["defi".to_string()].into_iter().collect(),
        }];
        apply_tags(&mut docs, &[" FAQ ".into(), String::new(), "defi".into()]);
        let tags: Vec<_> = docs[0].tags.iter().cloned().collect();
        assert_eq!(tags, vec!["defi", "faq"]);
    }

    #[test]
    fn sources_split_into_urls_and_files() {
        let (urls, files) = split_sources(
            &["notes.md".into(), "https://a.example/x".into(), " ".into()],
            &["https://a.example/x".into(), "http://b.example".into()],
        );
        assert_eq!(urls, vec!["https://a.example/x", "http://b.example"]);
        assert_eq!(files, vec!["notes.md"]);
    }

    #[tokio::test]
    async fn nothing_to_ingest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();

        let err = run(Some(&config_path), &[], &[]).await.unwrap_err();
        assert!(err.to_string().contains("nothing to ingest"));
    }

    #[tokio::test]
    async fn ingests_files_into_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("murmur.db");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                "[memory]\nbackend = \"sqlite\"\npath = {:?}\n\n[retrieval]\nchunk_chars = 200\n",
                db.display().to_string()
            ),
        )
        .unwrap();

        let notes = dir.path().join("bridges.md");
        std::fs::write(&notes, "Bridge fees spike when gas is high.\n\nWait for quieter hours.")
            .unwrap();

        run(Some(&config_path), &[notes.display().to_string()], &["defi".into()])
            .await
            .unwrap();

        let config = super::super::load_unvalidated(Some(&config_path)).unwrap();
        let store = super::super::open_store(&config.memory).await.unwrap();
        let found = store
            .query_fragments(&FragmentFilter::terms(vec!["bridge".into()]))
            .await
            .unwrap();
        assert!(!found.is_empty());
        assert!(found[0].tags.contains("defi"));
    }
}
