//! SQLite store with FTS5 search over knowledge fragments.
//!
//! Uses a single SQLite database file with three tables:
//! - `messages`: observed and agent-authored chat messages, unique per channel
//! - `fragments`: knowledge fragments written by ingestion
//! - `fragments_fts`: FTS5 virtual table over fragment text, keywords and tags
//!
//! Triggers keep the FTS index in sync on insert/delete/update.

use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use murmur_core::channel::ChannelId;
use murmur_core::error::StoreError;
use murmur_core::message::Message;
use murmur_core::store::{ContextStore, FragmentFilter, KnowledgeFragment, StoreStats};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::vector::{blob_to_embedding, embedding_to_blob};

/// A production SQLite context store.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Fixed-width UTC timestamps so text comparison orders chronologically.
fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

impl SqliteStore {
    /// Open (or create) a SQLite store.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives per connection
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite context store initialized at {path}");
        Ok(store)
    }

    /// Open a store backed by a database file, creating parent directories.
    pub async fn open_file(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Run schema migrations: creates tables, FTS5 virtual table, and triggers.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: &[(&str, &str)] = &[
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    channel_id    TEXT NOT NULL,
                    id            TEXT NOT NULL,
                    author_id     TEXT NOT NULL,
                    author_name   TEXT,
                    content       TEXT NOT NULL,
                    timestamp     TEXT NOT NULL,
                    reply_to_id   TEXT,
                    is_from_agent INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (channel_id, id)
                )
                "#,
            ),
            (
                "reply index",
                "CREATE INDEX IF NOT EXISTS idx_messages_reply ON messages(channel_id, reply_to_id)",
            ),
            (
                "timestamp index",
                "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
            ),
            (
                "fragments table",
                r#"
                CREATE TABLE IF NOT EXISTS fragments (
                    iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                    id           TEXT UNIQUE NOT NULL,
                    text         TEXT NOT NULL,
                    tags         TEXT NOT NULL DEFAULT '[]',
                    keywords     TEXT NOT NULL DEFAULT '',
                    embedding    BLOB,
                    source       TEXT NOT NULL,
                    ingested_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "FTS5 table",
                r#"
                CREATE VIRTUAL TABLE IF NOT EXISTS fragments_fts USING fts5(
                    text,
                    keywords,
                    tags,
                    content='fragments',
                    content_rowid='iid',
                    tokenize='porter unicode61'
                )
                "#,
            ),
            (
                "insert trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS fragments_ai AFTER INSERT ON fragments BEGIN
                    INSERT INTO fragments_fts(rowid, text, keywords, tags)
                    VALUES (new.iid, new.text, new.keywords, new.tags);
                END
                "#,
            ),
            (
                "delete trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS fragments_ad AFTER DELETE ON fragments BEGIN
                    INSERT INTO fragments_fts(fragments_fts, rowid, text, keywords, tags)
                    VALUES ('delete', old.iid, old.text, old.keywords, old.tags);
                END
                "#,
            ),
            (
                "update trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS fragments_au AFTER UPDATE ON fragments BEGIN
                    INSERT INTO fragments_fts(fragments_fts, rowid, text, keywords, tags)
                    VALUES ('delete', old.iid, old.text, old.keywords, old.tags);
                    INSERT INTO fragments_fts(rowid, text, keywords, tags)
                    VALUES (new.iid, new.text, new.keywords, new.tags);
                END
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let get = |column: &str| -> Result<String, StoreError> {
            row.try_get(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
        };
        let timestamp = parse_timestamp(&get("timestamp")?, "timestamp")?;
        let is_from_agent: i64 = row
            .try_get("is_from_agent")
            .map_err(|e| StoreError::QueryFailed(format!("is_from_agent column: {e}")))?;

        Ok(Message {
            id: get("id")?,
            channel_id: ChannelId(get("channel_id")?),
            author_id: get("author_id")?,
            author_name: row.try_get("author_name").unwrap_or(None),
            content: get("content")?,
            timestamp,
            reply_to_id: row.try_get("reply_to_id").unwrap_or(None),
            is_from_agent: is_from_agent != 0,
        })
    }

    /// Parse a `KnowledgeFragment` from a SQLite row.
    fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeFragment, StoreError> {
        let get = |column: &str| -> Result<String, StoreError> {
            row.try_get(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
        };

        let tags: BTreeSet<String> = serde_json::from_str(&get("tags")?).unwrap_or_default();
        let keywords = get("keywords")?
            .split_whitespace()
            .map(String::from)
            .collect();
        let embedding: Option<Vec<u8>> = row.try_get("embedding").unwrap_or(None);

        Ok(KnowledgeFragment {
            id: get("id")?,
            text: get("text")?,
            tags,
            keywords,
            embedding: embedding.map(|blob| blob_to_embedding(&blob)),
            source: get("source")?,
            ingested_at: parse_timestamp(&get("ingested_at")?, "ingested_at")?,
        })
    }

    /// Build a safe FTS5 query from normalized terms.
    ///
    /// Each term is stripped to alphanumerics, quoted, and prefix-matched;
    /// terms are OR-ed so any shared term makes a fragment a candidate.
    fn fts_query(terms: &[String]) -> String {
        terms
            .iter()
            .map(|t| {
                t.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    async fn fragments_by_terms(
        &self,
        fts: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeFragment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT f.*
            FROM fragments_fts x
            JOIN fragments f ON f.iid = x.rowid
            WHERE fragments_fts MATCH ?1
            ORDER BY bm25(fragments_fts)
            LIMIT ?2
            "#,
        )
        .bind(fts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter().map(Self::row_to_fragment).collect()
    }

    async fn fragments_by_tags(
        &self,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeFragment>, StoreError> {
        let conditions: Vec<String> = (0..tags.len())
            .map(|i| format!("tags LIKE ?{} ESCAPE '\\'", i + 2))
            .collect();
        let sql = format!(
            "SELECT * FROM fragments WHERE {} ORDER BY ingested_at DESC LIMIT ?1",
            conditions.join(" OR ")
        );

        let mut query = sqlx::query(&sql).bind(limit as i64);
        for tag in tags {
            // Escape SQL LIKE wildcards in tag values
            let escaped = tag
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            query = query.bind(format!("%\"{escaped}\"%"));
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("tag search: {e}")))?;

        rows.iter().map(Self::row_to_fragment).collect()
    }
}

#[async_trait]
impl ContextStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (channel_id, id, author_id, author_name, content, timestamp, reply_to_id, is_from_agent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(channel_id, id) DO NOTHING
            "#,
        )
        .bind(message.channel_id.as_str())
        .bind(&message.id)
        .bind(&message.author_id)
        .bind(&message.author_name)
        .bind(&message.content)
        .bind(timestamp_text(&message.timestamp))
        .bind(&message.reply_to_id)
        .bind(message.is_from_agent as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        // Snowflake order: longer IDs are newer, equal lengths compare lexically
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE channel_id = ?1
            ORDER BY length(id) DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(channel.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("recent messages: {e}")))?;

        let mut messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn get_message(
        &self,
        channel: &ChannelId,
        id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE channel_id = ?1 AND id = ?2")
            .bind(channel.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET message: {e}")))?;

        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn has_agent_reply(
        &self,
        channel: &ChannelId,
        trigger_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM messages
                WHERE channel_id = ?1 AND reply_to_id = ?2 AND is_from_agent = 1
            ) AS replied
            "#,
        )
        .bind(channel.as_str())
        .bind(trigger_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("reply check: {e}")))?;

        let replied: i64 = row
            .try_get("replied")
            .map_err(|e| StoreError::QueryFailed(format!("replied column: {e}")))?;
        Ok(replied != 0)
    }

    async fn latest_message_id(&self, channel: &ChannelId) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM messages WHERE channel_id = ?1 ORDER BY length(id) DESC, id DESC LIMIT 1",
        )
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("latest id: {e}")))?;

        row.map(|r| {
            r.try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))
        })
        .transpose()
    }

    async fn upsert_fragment(&self, fragment: &KnowledgeFragment) -> Result<(), StoreError> {
        let tags_json = serde_json::to_string(&fragment.tags)
            .map_err(|e| StoreError::Storage(format!("Tags serialization: {e}")))?;
        let embedding_blob: Option<Vec<u8>> = fragment.embedding.as_deref().map(embedding_to_blob);

        sqlx::query(
            r#"
            INSERT INTO fragments (id, text, tags, keywords, embedding, source, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                tags = excluded.tags,
                keywords = excluded.keywords,
                embedding = excluded.embedding,
                source = excluded.source,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&fragment.id)
        .bind(&fragment.text)
        .bind(&tags_json)
        .bind(fragment.keywords.join(" "))
        .bind(embedding_blob.as_deref())
        .bind(&fragment.source)
        .bind(timestamp_text(&fragment.ingested_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT fragment failed: {e}")))?;

        debug!(fragment_id = %fragment.id, "Stored fragment");
        Ok(())
    }

    async fn query_fragments(
        &self,
        filter: &FragmentFilter,
    ) -> Result<Vec<KnowledgeFragment>, StoreError> {
        let fts = Self::fts_query(&filter.terms);

        if fts.is_empty() && filter.tags.is_empty() {
            let rows = sqlx::query("SELECT * FROM fragments ORDER BY ingested_at DESC, id LIMIT ?1")
                .bind(filter.limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("fragment scan: {e}")))?;
            return rows.iter().map(Self::row_to_fragment).collect();
        }

        let mut results = Vec::new();
        if !fts.is_empty() {
            results = self.fragments_by_terms(&fts, filter.limit).await?;
        }
        if !filter.tags.is_empty() {
            let mut seen: HashSet<String> = results.iter().map(|f| f.id.clone()).collect();
            for fragment in self.fragments_by_tags(&filter.tags, filter.limit).await? {
                if seen.insert(fragment.id.clone()) {
                    results.push(fragment);
                }
            }
        }
        results.truncate(filter.limit);
        Ok(results)
    }

    async fn prune_messages(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE timestamp < ?1")
            .bind(timestamp_text(&before))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("PRUNE failed: {e}")))?;

        Ok(result.rows_affected() as usize)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM messages) AS messages,
                (SELECT COUNT(*) FROM fragments) AS fragments,
                (SELECT COUNT(DISTINCT channel_id) FROM messages) AS channels
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;

        let count = |column: &str| -> Result<usize, StoreError> {
            let n: i64 = row
                .try_get(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            messages: count("messages")?,
            fragments: count("fragments")?,
            channels: count("channels")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> Message {
        Message::new(id, ChannelId::from("900"), "7", format!("message {id}"), at(secs))
            .with_author_name("alice")
    }

    fn fragment(id: &str, text: &str, tags: &[&str], secs: i64) -> KnowledgeFragment {
        KnowledgeFragment {
            id: id.into(),
            text: text.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            keywords: crate::keywords::extract_keywords(text, 8),
            embedding: None,
            source: "faq.md".into(),
            ingested_at: at(secs),
        }
    }

    #[tokio::test]
    async fn message_insert_is_idempotent() {
        let store = test_store().await;
        let m = msg("1200", 0);
        assert!(store.insert_message(&m).await.unwrap());
        assert!(!store.insert_message(&m).await.unwrap());

        let loaded = store
            .get_message(&ChannelId::from("900"), "1200")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, m);
    }

    #[tokio::test]
    async fn recent_messages_follow_snowflake_order() {
        let store = test_store().await;
        // "999" is older than "1000" despite sorting after it lexically
        for (id, secs) in [("1001", 3), ("999", 1), ("1000", 2), ("998", 0)] {
            store.insert_message(&msg(id, secs)).await.unwrap();
        }
        let recent = store.recent_messages(&ChannelId::from("900"), 3).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["999", "1000", "1001"]);
        assert_eq!(
            store.latest_message_id(&ChannelId::from("900")).await.unwrap().as_deref(),
            Some("1001")
        );
    }

    #[tokio::test]
    async fn agent_reply_lookup() {
        let store = test_store().await;
        let channel = ChannelId::from("900");
        store.insert_message(&msg("10", 0)).await.unwrap();
        assert!(!store.has_agent_reply(&channel, "10").await.unwrap());

        // A human reply does not count
        store.insert_message(&msg("11", 1).replying_to("10")).await.unwrap();
        assert!(!store.has_agent_reply(&channel, "10").await.unwrap());

        let reply = Message::new("12", channel.clone(), "42", "hey", at(2))
            .replying_to("10")
            .from_agent();
        store.insert_message(&reply).await.unwrap();
        assert!(store.has_agent_reply(&channel, "10").await.unwrap());
    }

    #[tokio::test]
    async fn prune_and_stats() {
        let store = test_store().await;
        store.insert_message(&msg("1", 0)).await.unwrap();
        store.insert_message(&msg("2", 100)).await.unwrap();
        store
            .upsert_fragment(&fragment("f1", "staking rewards", &[], 0))
            .await
            .unwrap();

        assert_eq!(store.prune_messages(at(50)).await.unwrap(), 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.fragments, 1);
        assert_eq!(stats.channels, 1);
    }

    #[tokio::test]
    async fn fragment_upsert_replaces_and_keeps_embedding() {
        let store = test_store().await;
        let mut f = fragment("f1", "bridge fees depend on gas", &["fees"], 0);
        store.upsert_fragment(&f).await.unwrap();

        f.text = "bridge fees are flat".into();
        f.embedding = Some(vec![0.5, -0.25]);
        store.upsert_fragment(&f).await.unwrap();

        let all = store.query_fragments(&FragmentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "bridge fees are flat");
        assert_eq!(all[0].embedding, Some(vec![0.5, -0.25]));
        assert!(all[0].tags.contains("fees"));
    }

    #[tokio::test]
    async fn fts_query_matches_any_term() {
        let store = test_store().await;
        store
            .upsert_fragment(&fragment("a", "Staking rewards are paid weekly", &[], 0))
            .await
            .unwrap();
        store
            .upsert_fragment(&fragment("b", "Bridge fees depend on gas prices", &[], 1))
            .await
            .unwrap();
        store
            .upsert_fragment(&fragment("c", "The roadmap lists a mainnet launch", &["roadmap"], 2))
            .await
            .unwrap();

        let hits = store
            .query_fragments(&FragmentFilter::terms(vec!["rewards".into(), "gas".into()]))
            .await
            .unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|f| f.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        let by_tag = FragmentFilter {
            terms: vec!["nothingmatches".into()],
            tags: vec!["roadmap".into()],
            limit: 10,
        };
        let hits = store.query_fragments(&by_tag).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");
    }

    #[test]
    fn fts_query_sanitizes_terms() {
        let q = SqliteStore::fts_query(&["rust\"; DROP".into(), "".into(), "gas".into()]);
        assert_eq!(q, "\"rustDROP\"* OR \"gas\"*");
    }
}
