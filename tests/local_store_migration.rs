//! Opening cache files written by older builds.

use std::time::Duration;

use chrono::Utc;
use news_sync::db::LocalStore;
use news_sync::models::{Article, CachedArticle};
use rusqlite::{params, Connection};
use tempfile::TempDir;

const V1_SCHEMA: &str = r#"
    CREATE TABLE news_articles (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT,
        content TEXT,
        source TEXT,
        author TEXT,
        published_at TEXT,
        image_url TEXT,
        categories TEXT,
        article_url TEXT,
        timestamp INTEGER
    );
"#;

fn legacy_file(dir: &TempDir, schema: &str, rows: usize) -> String {
    let path = dir.path().join("news.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(schema).unwrap();

    let now = Utc::now().timestamp_millis();
    for i in 0..rows {
        conn.execute(
            "INSERT INTO news_articles (id, title, source, published_at, categories, timestamp)
             VALUES (?1, ?2, 'Wire', '2024-01-01T00:00:00Z', '[\"world\"]', ?3)",
            params![format!("a{i}"), format!("Title {i}"), now - i as i64],
        )
        .unwrap();
    }
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn first_shape_upgrades_without_losing_rows() {
    let dir = TempDir::new().unwrap();
    let path = legacy_file(&dir, V1_SCHEMA, 5);

    let store = LocalStore::new(&path).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 5);

    let rows = store.query_all(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(rows.len(), 5);
    for row in &rows {
        assert!(row.article.ai_categories.is_empty());
        assert!(!row.article.is_saved);
        assert_eq!(row.article.categories, vec!["world"]);
    }

    store.set_saved("a3", true).await.unwrap();
    let saved = store.query_saved().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].article.id, "a3");
}

#[tokio::test]
async fn shape_with_ai_category_only_gains_the_rest() {
    let dir = TempDir::new().unwrap();
    let schema = format!(
        "{V1_SCHEMA}
         ALTER TABLE news_articles ADD COLUMN ai_category TEXT NOT NULL DEFAULT '';"
    );
    let path = legacy_file(&dir, &schema, 0);
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO news_articles (id, title, source, published_at, categories, timestamp, ai_category)
             VALUES ('s1', 'Space', 'Wire', '', '[]', ?1, 'science,space')",
            params![Utc::now().timestamp_millis()],
        )
        .unwrap();
    }

    let store = LocalStore::new(&path).await.unwrap();
    let row = store.get_by_id("s1").await.unwrap().unwrap();
    assert_eq!(row.article.ai_categories, vec!["science", "space"]);

    let tagged = store
        .query_by_ai_category("space", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
}

#[tokio::test]
async fn reopening_a_migrated_file_keeps_everything() {
    let dir = TempDir::new().unwrap();
    let path = legacy_file(&dir, V1_SCHEMA, 3);

    {
        let store = LocalStore::new(&path).await.unwrap();
        store.set_saved("a0", true).await.unwrap();
    }
    let store = LocalStore::new(&path).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 3);
    assert_eq!(store.query_saved().await.unwrap().len(), 1);
}

#[tokio::test]
async fn ttl_filter_matches_the_cutoff() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("news.db");
    let store = LocalStore::new(&path.to_string_lossy()).await.unwrap();

    let now = Utc::now().timestamp_millis();
    let hour = 60 * 60 * 1000;
    let ages = [0, hour / 2, 2 * hour, 25 * hour];
    let records = ages
        .iter()
        .enumerate()
        .map(|(i, age)| {
            let article = Article::new(format!("t{i}"), "t", "s");
            CachedArticle::new(article, now - age)
        })
        .collect();
    store.upsert_many(records).await.unwrap();

    let within = |max_age: Duration| {
        let store = &store;
        async move {
            store
                .query_all(max_age)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.article.id)
                .collect::<Vec<_>>()
        }
    };

    assert_eq!(within(Duration::from_secs(3600)).await, vec!["t0", "t1"]);
    assert_eq!(
        within(Duration::from_secs(24 * 3600)).await,
        vec!["t0", "t1", "t2"]
    );
    assert_eq!(within(Duration::from_secs(48 * 3600)).await.len(), 4);
}
