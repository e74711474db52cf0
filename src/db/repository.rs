use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{join_tags, split_tags, Article, CachedArticle};

use super::migrations::migrate;
use super::schema::ARTICLE_COLUMNS;

/// Durable on-device article cache with TTL-filtered list queries.
///
/// All statements run on tokio-rusqlite's single connection thread, so each
/// call is atomic with respect to other callers without extra locking.
pub struct LocalStore {
    conn: Connection,
}

/// Pre-encoded column values; JSON encoding happens outside the db thread.
struct ArticleParams {
    id: String,
    title: String,
    content: Option<String>,
    source: String,
    author: Option<String>,
    published_at: String,
    image_url: Option<String>,
    categories: String,
    article_url: Option<String>,
    keywords: Option<String>,
    language: Option<String>,
    ai_summary: Option<String>,
    ai_category: String,
    reliability_score: Option<f64>,
    timestamp: i64,
    is_saved: bool,
}

impl ArticleParams {
    fn encode(record: CachedArticle) -> Result<Self> {
        let ai_category = record.ai_category();
        let CachedArticle { article, timestamp } = record;
        Ok(Self {
            categories: serde_json::to_string(&article.categories)?,
            keywords: article
                .keywords
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            id: article.id,
            title: article.title,
            content: article.content,
            source: article.source,
            author: article.author,
            published_at: article.published_at,
            image_url: article.image_url,
            article_url: article.article_url,
            language: article.language,
            ai_summary: article.ai_summary,
            ai_category,
            reliability_score: article.reliability_score,
            timestamp,
            is_saved: article.is_saved,
        })
    }
}

const INSERT_IF_ABSENT_SQL: &str = r#"INSERT INTO news_articles (id, title, content, source, author,
           published_at, image_url, categories, article_url, keywords, language, ai_summary,
           ai_category, reliability_score, timestamp, is_saved)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
       ON CONFLICT(id) DO NOTHING"#;

const UPSERT_SQL: &str = r#"INSERT INTO news_articles (id, title, content, source, author, published_at,
           image_url, categories, article_url, keywords, language, ai_summary, ai_category,
           reliability_score, timestamp, is_saved)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
       ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           content = excluded.content,
           source = excluded.source,
           author = excluded.author,
           published_at = excluded.published_at,
           image_url = excluded.image_url,
           categories = excluded.categories,
           article_url = excluded.article_url,
           keywords = excluded.keywords,
           language = excluded.language,
           ai_summary = COALESCE(excluded.ai_summary, news_articles.ai_summary),
           ai_category = CASE WHEN excluded.ai_category = '' THEN news_articles.ai_category
                              ELSE excluded.ai_category END,
           reliability_score = COALESCE(excluded.reliability_score, news_articles.reliability_score),
           timestamp = excluded.timestamp,
           is_saved = MAX(news_articles.is_saved, excluded.is_saved)"#;

impl LocalStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        let applied = conn
            .call(|conn| {
                let applied = migrate(conn)?;
                Ok(applied)
            })
            .await?;

        if applied.iter().any(|step| *step != "support_tables") {
            tracing::info!("Local cache schema migrated: {}", applied.join(", "));
        }

        Ok(Self { conn })
    }

    // Article cache

    /// Insert-or-replace by id. Content is last-write-wins; a saved row stays
    /// saved and AI-derived fields survive a refresh that carries none.
    pub async fn upsert_many(&self, records: Vec<CachedArticle>) -> Result<usize> {
        let rows = records
            .into_iter()
            .map(ArticleParams::encode)
            .collect::<Result<Vec<_>>>()?;

        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(UPSERT_SQL)?;
                    for row in &rows {
                        stmt.execute(params![
                            row.id,
                            row.title,
                            row.content,
                            row.source,
                            row.author,
                            row.published_at,
                            row.image_url,
                            row.categories,
                            row.article_url,
                            row.keywords,
                            row.language,
                            row.ai_summary,
                            row.ai_category,
                            row.reliability_score,
                            row.timestamp,
                            row.is_saved,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;
        Ok(count)
    }

    /// Rows newer than `now - max_age`, newest first.
    pub async fn query_all(&self, max_age: Duration) -> Result<Vec<CachedArticle>> {
        let cutoff = cutoff_millis(max_age);
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM news_articles
                     WHERE timestamp >= ?1 ORDER BY timestamp DESC"
                ))?;
                let records = stmt
                    .query_map(params![cutoff], cached_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Substring match on the comma-joined AI tags, same TTL filter as `query_all`.
    pub async fn query_by_ai_category(
        &self,
        tag: &str,
        max_age: Duration,
    ) -> Result<Vec<CachedArticle>> {
        let cutoff = cutoff_millis(max_age);
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Ok(Vec::new());
        }
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM news_articles
                     WHERE timestamp >= ?1 AND instr(lower(ai_category), lower(?2)) > 0
                     ORDER BY timestamp DESC"
                ))?;
                let records = stmt
                    .query_map(params![cutoff, tag], cached_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Point lookup that ignores TTL.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<CachedArticle>> {
        let id = id.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM news_articles WHERE id = ?1"),
                        params![id],
                        cached_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    /// Deletes rows older than `now - max_age`. Saved rows and rows backing
    /// the reading history are kept so the offline read paths can serve them.
    pub async fn purge_expired(&self, max_age: Duration) -> Result<usize> {
        let cutoff = cutoff_millis(max_age);
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM news_articles
                     WHERE timestamp < ?1
                       AND is_saved = 0
                       AND id NOT IN (SELECT article_id FROM reading_history)",
                    params![cutoff],
                )?;
                Ok(deleted)
            })
            .await?;
        if deleted > 0 {
            tracing::debug!("Purged {} expired cache rows", deleted);
        }
        Ok(deleted)
    }

    pub async fn query_saved(&self) -> Result<Vec<CachedArticle>> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM news_articles
                     WHERE is_saved = 1 ORDER BY timestamp DESC"
                ))?;
                let records = stmt
                    .query_map([], cached_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// No-op when the id is not cached.
    pub async fn set_saved(&self, id: &str, saved: bool) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE news_articles SET is_saved = ?1 WHERE id = ?2",
                    params![saved, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_ai_summary(&self, id: &str, summary: &str) -> Result<()> {
        let id = id.to_string();
        let summary = summary.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE news_articles SET ai_summary = ?1 WHERE id = ?2",
                    params![summary, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_ai_categories(&self, id: &str, tags: &[String]) -> Result<()> {
        let id = id.to_string();
        let joined = join_tags(tags);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE news_articles SET ai_category = ?1 WHERE id = ?2",
                    params![joined, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM news_articles", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await?;
        Ok(count)
    }

    // Reading history mirror

    /// Stamps the article as read; re-reading moves it to the top. The read
    /// time lives only in `reading_history`: an already cached row keeps its
    /// content and refresh time, a new one is cached as of now.
    pub async fn record_read(&self, article: Article, read_at: i64) -> Result<()> {
        let row = ArticleParams::encode(CachedArticle::now(article))?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    INSERT_IF_ABSENT_SQL,
                    params![
                        row.id,
                        row.title,
                        row.content,
                        row.source,
                        row.author,
                        row.published_at,
                        row.image_url,
                        row.categories,
                        row.article_url,
                        row.keywords,
                        row.language,
                        row.ai_summary,
                        row.ai_category,
                        row.reliability_score,
                        row.timestamp,
                        row.is_saved,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO reading_history (article_id, read_at) VALUES (?1, ?2)
                     ON CONFLICT(article_id) DO UPDATE SET read_at = excluded.read_at",
                    params![row.id, read_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn history_read_at(&self, id: &str) -> Result<Option<i64>> {
        let id = id.to_string();
        let read_at = self
            .conn
            .call(move |conn| {
                let read_at = conn
                    .query_row(
                        "SELECT read_at FROM reading_history WHERE article_id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(read_at)
            })
            .await?;
        Ok(read_at)
    }

    /// Puts a history entry back to an earlier read time, or removes it when
    /// there was none.
    pub async fn restore_history(&self, id: &str, read_at: Option<i64>) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                match read_at {
                    Some(read_at) => conn.execute(
                        "INSERT INTO reading_history (article_id, read_at) VALUES (?1, ?2)
                         ON CONFLICT(article_id) DO UPDATE SET read_at = excluded.read_at",
                        params![id, read_at],
                    )?,
                    None => conn.execute(
                        "DELETE FROM reading_history WHERE article_id = ?1",
                        params![id],
                    )?,
                };
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Read articles, most recently read first.
    pub async fn query_history(&self) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(|conn| {
                let columns = ARTICLE_COLUMNS
                    .split(", ")
                    .map(|c| format!("a.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM reading_history h
                     JOIN news_articles a ON a.id = h.article_id
                     ORDER BY h.read_at DESC"
                ))?;
                let articles = stmt
                    .query_map([], |row| cached_from_row(row).map(|r| r.article))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn remove_history(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM reading_history WHERE article_id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM reading_history", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn cutoff_millis(max_age: Duration) -> i64 {
    let age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_sub(age)
}

fn decode_list(json: Option<String>) -> Option<Vec<String>> {
    json.and_then(|s| serde_json::from_str(&s).ok())
}

fn cached_from_row(row: &Row) -> rusqlite::Result<CachedArticle> {
    let ai_category: String = row.get(12)?;
    let article = Article {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        author: row.get(4)?,
        published_at: row.get(5)?,
        image_url: row.get(6)?,
        categories: decode_list(row.get(7)?).unwrap_or_default(),
        article_url: row.get(8)?,
        keywords: decode_list(row.get(9)?),
        language: row.get(10)?,
        ai_summary: row.get(11)?,
        ai_categories: split_tags(&ai_category),
        reliability_score: row.get(13)?,
        is_saved: row.get::<_, i64>(15)? != 0,
    };
    Ok(CachedArticle {
        article,
        timestamp: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60 * 60);

    fn article(id: &str) -> Article {
        let mut article = Article::new(id, format!("Title {id}"), "Wire");
        article.published_at = "2024-05-01T10:00:00Z".into();
        article.categories = vec!["technology".into()];
        article
    }

    fn stale_timestamp() -> i64 {
        Utc::now().timestamp_millis() - TTL.as_millis() as i64 - 1
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .upsert_many(vec![CachedArticle::now(article("a1"))])
            .await
            .unwrap();

        let mut updated = article("a1");
        updated.title = "Updated".into();
        store
            .upsert_many(vec![CachedArticle::now(updated)])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.get_by_id("a1").await.unwrap().unwrap();
        assert_eq!(row.article.title, "Updated");
        assert_eq!(row.article.categories, vec!["technology"]);
    }

    #[tokio::test]
    async fn stale_rows_are_hidden_from_lists_but_not_point_lookups() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .upsert_many(vec![
                CachedArticle::new(article("old"), stale_timestamp()),
                CachedArticle::now(article("new")),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .query_all(TTL)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.article.id)
            .collect();
        assert_eq!(ids, vec!["new"]);
        assert!(store.get_by_id("old").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_keeps_saved_rows() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut saved = article("saved");
        saved.is_saved = true;
        store
            .upsert_many(vec![
                CachedArticle::new(article("old"), stale_timestamp()),
                CachedArticle::new(saved, stale_timestamp()),
            ])
            .await
            .unwrap();

        assert_eq!(store.purge_expired(TTL).await.unwrap(), 1);
        assert!(store.get_by_id("old").await.unwrap().is_none());
        let saved: Vec<_> = store.query_saved().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].article.id, "saved");
    }

    #[tokio::test]
    async fn refresh_does_not_clear_save_flag_or_ai_fields() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut first = article("a1");
        first.is_saved = true;
        first.ai_summary = Some("summary".into());
        first.ai_categories = vec!["science".into()];
        store.upsert_many(vec![CachedArticle::now(first)]).await.unwrap();

        store
            .upsert_many(vec![CachedArticle::now(article("a1"))])
            .await
            .unwrap();

        let row = store.get_by_id("a1").await.unwrap().unwrap().article;
        assert!(row.is_saved);
        assert_eq!(row.ai_summary.as_deref(), Some("summary"));
        assert_eq!(row.ai_categories, vec!["science"]);
    }

    #[tokio::test]
    async fn ai_category_query_matches_substrings() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut a1 = article("a1");
        a1.ai_categories = vec!["politics".into(), "economy".into()];
        let mut a2 = article("a2");
        a2.ai_categories = vec!["sports".into()];
        store
            .upsert_many(vec![CachedArticle::now(a1), CachedArticle::now(a2)])
            .await
            .unwrap();

        let hits = store.query_by_ai_category("econ", TTL).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].article.id, "a1");
        assert_eq!(hits[0].ai_category(), "politics,economy");
    }

    #[tokio::test]
    async fn set_saved_on_missing_id_is_a_no_op() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.set_saved("missing", true).await.unwrap();
        assert!(store.query_saved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_orders_by_read_time() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.record_read(article("a1"), 1_000).await.unwrap();
        store.record_read(article("a2"), 2_000).await.unwrap();
        store.record_read(article("a1"), 3_000).await.unwrap();

        let ids: Vec<_> = store
            .query_history()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);

        store.remove_history("a1").await.unwrap();
        assert_eq!(store.query_history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reading_keeps_the_cached_refresh_time() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .upsert_many(vec![CachedArticle::now(article("a1"))])
            .await
            .unwrap();

        let two_days_ago = Utc::now().timestamp_millis() - 2 * 24 * 60 * 60 * 1000;
        let mut reread = article("a1");
        reread.title = "From history".into();
        store.record_read(reread, two_days_ago).await.unwrap();

        let listed = store.query_all(TTL).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].article.title, "Title a1");
        assert_eq!(store.history_read_at("a1").await.unwrap(), Some(two_days_ago));

        // History-only articles are cached as of now
        store.record_read(article("a2"), two_days_ago).await.unwrap();
        assert_eq!(store.query_all(TTL).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restore_history_reverts_or_removes_an_entry() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.record_read(article("a1"), 1_000).await.unwrap();
        store.record_read(article("a1"), 5_000).await.unwrap();

        store.restore_history("a1", Some(1_000)).await.unwrap();
        assert_eq!(store.history_read_at("a1").await.unwrap(), Some(1_000));

        store.restore_history("a1", None).await.unwrap();
        assert!(store.query_history().await.unwrap().is_empty());
        assert!(store.get_by_id("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn blank_ai_category_matches_nothing() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut a1 = article("a1");
        a1.ai_categories = vec!["science".into()];
        store.upsert_many(vec![CachedArticle::now(a1)]).await.unwrap();

        assert!(store.query_by_ai_category("", TTL).await.unwrap().is_empty());
        assert!(store.query_by_ai_category("  ", TTL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn database_file_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let path = path.to_str().unwrap();

        let store = LocalStore::new(path).await.unwrap();
        store
            .upsert_many(vec![CachedArticle::now(article("a1"))])
            .await
            .unwrap();
        drop(store);

        let reopened = LocalStore::new(path).await.unwrap();
        assert!(reopened.get_by_id("a1").await.unwrap().is_some());
    }
}
