//! Schema evolution for the local article cache.
//!
//! Each step inspects the live table with `PRAGMA table_info` before touching
//! it, so a database from any earlier build converges on the current shape
//! regardless of which steps already ran. `user_version` is only written.

use rusqlite::{params, Connection};

use super::schema::{
    create_articles_table, ARTICLES_TABLE, ARTICLE_COLUMNS, REQUIRED_COLUMNS, SCHEMA_VERSION,
    SUPPORT_SCHEMA,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub not_null: bool,
}

/// Live shape of `news_articles`; empty when the table does not exist.
#[derive(Debug, Clone, Default)]
pub struct TableShape {
    pub columns: Vec<ColumnInfo>,
}

impl TableShape {
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn is_nullable(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name && !c.not_null)
    }
}

pub fn table_shape(conn: &Connection, table: &str) -> rusqlite::Result<TableShape> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                not_null: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(TableShape { columns })
}

struct Migration {
    name: &'static str,
    needed: fn(&TableShape) -> bool,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const ENRICHMENT_COLUMNS: &[(&str, &str)] = &[
    ("keywords", "TEXT"),
    ("language", "TEXT"),
    ("ai_summary", "TEXT"),
    ("reliability_score", "REAL"),
];

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_articles",
        needed: |shape| !shape.exists(),
        apply: |conn| conn.execute_batch(&create_articles_table(ARTICLES_TABLE)),
    },
    Migration {
        name: "add_ai_category",
        needed: |shape| !shape.has_column("ai_category"),
        apply: |conn| {
            conn.execute_batch(
                "ALTER TABLE news_articles ADD COLUMN ai_category TEXT NOT NULL DEFAULT ''",
            )
        },
    },
    Migration {
        name: "add_is_saved",
        needed: |shape| !shape.has_column("is_saved"),
        apply: |conn| {
            conn.execute_batch(
                "ALTER TABLE news_articles ADD COLUMN is_saved INTEGER NOT NULL DEFAULT 0",
            )
        },
    },
    Migration {
        name: "add_enrichment_columns",
        needed: |shape| ENRICHMENT_COLUMNS.iter().any(|(c, _)| !shape.has_column(c)),
        apply: |conn| {
            let shape = table_shape(conn, ARTICLES_TABLE)?;
            for (column, ty) in ENRICHMENT_COLUMNS {
                if !shape.has_column(column) {
                    conn.execute_batch(&format!(
                        "ALTER TABLE news_articles ADD COLUMN {column} {ty}"
                    ))?;
                }
            }
            Ok(())
        },
    },
    Migration {
        name: "rebuild_required_columns",
        needed: |shape| REQUIRED_COLUMNS.iter().any(|c| shape.is_nullable(c)),
        apply: rebuild_articles_table,
    },
    Migration {
        name: "support_tables",
        needed: |_| true,
        apply: |conn| conn.execute_batch(SUPPORT_SCHEMA),
    },
];

/// Copy-and-swap into a table with the current constraints. Stale NULLs in
/// required columns are backfilled; no row is dropped.
fn rebuild_articles_table(conn: &Connection) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute_batch("DROP TABLE IF EXISTS news_articles_rebuild")?;
    conn.execute_batch(&create_articles_table("news_articles_rebuild"))?;
    conn.execute(
        &format!(
            r#"INSERT INTO news_articles_rebuild ({ARTICLE_COLUMNS})
               SELECT id, COALESCE(title, ''), content, COALESCE(source, ''), author,
                      COALESCE(published_at, ''), image_url, COALESCE(categories, '[]'),
                      article_url, keywords, language, ai_summary, COALESCE(ai_category, ''),
                      reliability_score, COALESCE(timestamp, ?1), COALESCE(is_saved, 0)
               FROM news_articles"#
        ),
        params![now],
    )?;
    conn.execute_batch(
        "DROP TABLE news_articles;
         ALTER TABLE news_articles_rebuild RENAME TO news_articles;",
    )?;
    Ok(())
}

/// Brings the database to the current shape inside one transaction and
/// returns the names of the steps that ran.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<Vec<&'static str>> {
    let tx = conn.transaction()?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        let shape = table_shape(&tx, ARTICLES_TABLE)?;
        if (migration.needed)(&shape) {
            (migration.apply)(&tx)?;
            applied.push(migration.name);
        }
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_V1: &str = r#"
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

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM news_articles", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_database_gets_current_shape() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, vec!["create_articles", "support_tables"]);

        let shape = table_shape(&conn, ARTICLES_TABLE).unwrap();
        for column in REQUIRED_COLUMNS {
            assert!(shape.has_column(column));
            assert!(!shape.is_nullable(column), "{column} should be NOT NULL");
        }
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn migrating_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, vec!["support_tables"]);
    }

    #[test]
    fn legacy_rows_survive_every_step() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_V1).unwrap();
        conn.execute_batch(
            "INSERT INTO news_articles (id, title, source, published_at, categories, timestamp)
                 VALUES ('a1', 'One', 'Wire', '2024-01-01', '[\"world\"]', 1000);
             INSERT INTO news_articles (id, title, source, published_at, categories, timestamp)
                 VALUES ('a2', NULL, 'Wire', NULL, NULL, NULL);",
        )
        .unwrap();

        let applied = migrate(&mut conn).unwrap();
        assert!(applied.contains(&"add_ai_category"));
        assert!(applied.contains(&"add_is_saved"));
        assert!(applied.contains(&"rebuild_required_columns"));
        assert_eq!(count(&conn), 2);

        let (ai_category, saved, ts): (String, i64, i64) = conn
            .query_row(
                "SELECT ai_category, is_saved, timestamp FROM news_articles WHERE id = 'a1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(ai_category, "");
        assert_eq!(saved, 0);
        assert_eq!(ts, 1000);

        let (title, ts): (String, i64) = conn
            .query_row(
                "SELECT title, timestamp FROM news_articles WHERE id = 'a2'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(title, "");
        assert!(ts > 0);
    }

    #[test]
    fn partially_migrated_table_only_gets_missing_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_V1).unwrap();
        conn.execute_batch(
            "ALTER TABLE news_articles ADD COLUMN ai_category TEXT NOT NULL DEFAULT ''",
        )
        .unwrap();

        let applied = migrate(&mut conn).unwrap();
        assert!(!applied.contains(&"add_ai_category"));
        assert!(applied.contains(&"add_is_saved"));
    }
}
