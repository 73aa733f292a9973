//! Web page ingestion: fetch pages and keep their readable text.
//!
//! Extraction prefers a content container (`article`, `main`, common blog
//! and docs wrappers) and falls back to `body`. Inside it, the outermost
//! block elements (headings, paragraphs, list items, code, quotes, cells)
//! become paragraphs so [`crate::chunk_text`] can split on them. Script,
//! style and navigation text is dropped.

use std::collections::BTreeSet;
use std::time::Duration;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{info, warn};

use crate::ingest::{IngestDocument, IngestError};

/// Containers tried in order before falling back to `body`.
const CONTENT_CONTAINERS: &[&str] = &[
    "article",
    "main",
    "[role=main]",
    "div.post-content",
    "div.entry-content",
    "div.markdown-content",
    "div.page-content",
    "#content",
    "#main-content",
];

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "pre", "blockquote", "td",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "nav", "footer"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between consecutive page fetches.
const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(1);

/// Turn an HTML page into an ingestable document.
///
/// The URL becomes the source and its host a tag. Returns `None` when the
/// page has no readable text.
pub fn extract_page(html: &str, url: &str) -> Option<IngestDocument> {
    let document = Html::parse_document(html);
    let root = content_root(&document)?;

    let mut paragraphs: Vec<String> = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| is_block(el) && !has_block_ancestor(el, &root) && !is_skipped(el, &root))
        .map(|el| visible_text(&el))
        .filter(|text| !text.is_empty())
        .collect();
    paragraphs.dedup();

    if paragraphs.is_empty() {
        let text = visible_text(&root);
        if text.is_empty() {
            return None;
        }
        paragraphs.push(text);
    }

    let tags: BTreeSet<String> = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .into_iter()
        .collect();

    Some(IngestDocument {
        source: url.to_string(),
        content: paragraphs.join("\n\n"),
        tags,
    })
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    for selector in CONTENT_CONTAINERS.iter().filter_map(|s| Selector::parse(s).ok()) {
        if let Some(found) = document
            .select(&selector)
            .find(|el| !visible_text(el).is_empty())
        {
            return Some(found);
        }
    }
    Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .or_else(|| Some(document.root_element()))
}

fn is_block(el: &ElementRef<'_>) -> bool {
    BLOCK_TAGS.contains(&el.value().name())
}

/// Whether a block element sits inside another block below `root`.
fn has_block_ancestor(el: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| is_block(&ancestor))
}

fn is_skipped(el: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    SKIPPED_TAGS.contains(&el.value().name())
        || el
            .ancestors()
            .take_while(|node| node.id() != root.id())
            .filter_map(ElementRef::wrap)
            .any(|ancestor| SKIPPED_TAGS.contains(&ancestor.value().name()))
}

/// Text under `el` with whitespace collapsed, skipping non-content elements.
fn visible_text(el: &ElementRef<'_>) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| {
                matches!(ancestor.value().name(), "script" | "style" | "noscript" | "template")
            });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Fetches pages over HTTP for ingestion.
pub struct WebScraper {
    client: reqwest::Client,
    delay: Duration,
}

impl WebScraper {
    pub fn new() -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("murmur/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Fetch {
                url: String::new(),
                reason: format!("HTTP client setup failed: {e}"),
            })?;
        Ok(Self {
            client,
            delay: DEFAULT_FETCH_DELAY,
        })
    }

    /// Pause between pages in [`WebScraper::fetch_all`].
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetch one page and extract its text.
    pub async fn fetch(&self, url: &str) -> Result<IngestDocument, IngestError> {
        let fetch_error = |reason: String| IngestError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_error(e.to_string()))?;
        let html = response.text().await.map_err(|e| fetch_error(e.to_string()))?;

        extract_page(&html, url).ok_or_else(|| IngestError::Parse {
            path: url.to_string(),
            reason: "no readable content".into(),
        })
    }

    /// Fetch every page; failures are returned alongside the documents.
    pub async fn fetch_all(&self, urls: &[String]) -> (Vec<IngestDocument>, Vec<IngestError>) {
        let mut docs = Vec::new();
        let mut failures = Vec::new();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.fetch(url).await {
                Ok(doc) => {
                    info!(url = %url, chars = doc.content.len(), "Fetched page");
                    docs.push(doc);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping page");
                    failures.push(e);
                }
            }
        }
        (docs, failures)
    }
}

/// Whether an ingest source names a web page rather than a file.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
