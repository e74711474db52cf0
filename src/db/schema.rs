/// Shape written to `PRAGMA user_version` after a successful migration run.
/// Informational only: every step re-checks the live table shape.
pub const SCHEMA_VERSION: i64 = 5;

pub const ARTICLES_TABLE: &str = "news_articles";

/// Column list of the current `news_articles` table, in declaration order.
pub const ARTICLE_COLUMNS: &str = "id, title, content, source, author, published_at, image_url, \
     categories, article_url, keywords, language, ai_summary, ai_category, reliability_score, \
     timestamp, is_saved";

/// Columns that must be NOT NULL in the current shape. A nullable one means
/// the table was created by an older build and needs the corrective rebuild.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "title",
    "source",
    "published_at",
    "categories",
    "ai_category",
    "timestamp",
    "is_saved",
];

pub fn create_articles_table(name: &str) -> String {
    format!(
        r#"
CREATE TABLE {name} (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    content TEXT,
    source TEXT NOT NULL DEFAULT '',
    author TEXT,
    published_at TEXT NOT NULL DEFAULT '',
    image_url TEXT,
    categories TEXT NOT NULL DEFAULT '[]',
    article_url TEXT,
    keywords TEXT,
    language TEXT,
    ai_summary TEXT,
    ai_category TEXT NOT NULL DEFAULT '',
    reliability_score REAL,
    timestamp INTEGER NOT NULL,
    is_saved INTEGER NOT NULL DEFAULT 0
);
"#
    )
}

pub const SUPPORT_SCHEMA: &str = r#"
-- reading history mirror (fallback for the cloud history read path)
CREATE TABLE IF NOT EXISTS reading_history (
    article_id TEXT PRIMARY KEY NOT NULL,
    read_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reading_history_read_at ON reading_history(read_at DESC);
CREATE INDEX IF NOT EXISTS idx_news_articles_timestamp ON news_articles(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_news_articles_is_saved ON news_articles(is_saved);
"#;
