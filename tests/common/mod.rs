#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use news_sync::ai::ArticleAnalyzer;
use news_sync::auth::Session;
use news_sync::cloud::{MemoryDocumentStore, UserCloudStore};
use news_sync::db::LocalStore;
use news_sync::models::{Article, ArticleList};
use news_sync::news::ArticleSource;
use news_sync::sync::{SyncCoordinator, SyncOptions};
use news_sync::{AppError, Result};

pub const PAGE_SIZE: u32 = 2;
pub const TTL: Duration = Duration::from_secs(60 * 60);

pub fn article(id: &str) -> Article {
    let mut article = Article::new(id, format!("Title {id}"), "Wire");
    article.published_at = "2024-05-01T10:00:00Z".into();
    article.content = Some(format!("Body of {id}"));
    article
}

pub fn ids(articles: &[Article]) -> Vec<String> {
    articles.iter().map(|a| a.id.clone()).collect()
}

/// Serves canned pages keyed by bucket (category or search text) and page index.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<(Option<String>, u32), std::result::Result<Vec<Article>, u16>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, bucket: Option<&str>, index: u32, ids: &[&str]) {
        self.pages.lock().unwrap().insert(
            (bucket.map(str::to_string), index),
            Ok(ids.iter().map(|id| article(id)).collect()),
        );
    }

    pub fn fail(&self, bucket: Option<&str>, index: u32, status: u16) {
        self.pages.lock().unwrap().insert(
            (bucket.map(str::to_string), index),
            Err(status),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, bucket: Option<&str>, offset: u32, page_size: u32) -> Result<ArticleList> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Suspend like a real network call so concurrent callers interleave
        tokio::task::yield_now().await;

        let key = (bucket.map(str::to_string), offset / page_size);
        match self.pages.lock().unwrap().get(&key) {
            Some(Ok(articles)) => Ok(ArticleList {
                articles: articles.clone(),
                total_results: None,
            }),
            Some(Err(status)) => Err(AppError::network(Some(*status), "service unavailable")),
            None => Ok(ArticleList::default()),
        }
    }
}

#[async_trait]
impl ArticleSource for ScriptedSource {
    async fn fetch(&self, category: Option<&str>, offset: u32, page_size: u32) -> Result<ArticleList> {
        self.serve(category, offset, page_size).await
    }

    async fn search(&self, text: &str, offset: u32, page_size: u32) -> Result<ArticleList> {
        self.serve(Some(text), offset, page_size).await
    }
}

pub struct StubAnalyzer;

#[async_trait]
impl ArticleAnalyzer for StubAnalyzer {
    async fn classify(&self, text: &str) -> Result<Vec<String>> {
        if text.contains("chip") {
            Ok(vec!["technology".into(), "business".into()])
        } else {
            Ok(vec!["general".into()])
        }
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        Ok(format!("summary: {}", text.lines().next().unwrap_or_default()))
    }
}

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub docs: Arc<MemoryDocumentStore>,
    pub local: Arc<LocalStore>,
    pub session: Session,
    pub cloud: Arc<UserCloudStore>,
    pub coordinator: SyncCoordinator,
}

pub async fn harness(session: Session) -> Harness {
    let source = Arc::new(ScriptedSource::new());
    let docs = Arc::new(MemoryDocumentStore::new());
    let local = Arc::new(LocalStore::open_in_memory().await.unwrap());
    let cloud = Arc::new(UserCloudStore::new(docs.clone(), local.clone(), session.clone()));
    let coordinator = SyncCoordinator::new(
        source.clone(),
        cloud.clone(),
        local.clone(),
        SyncOptions {
            page_size: PAGE_SIZE,
            cache_ttl: TTL,
        },
    )
    .with_analyzer(Arc::new(StubAnalyzer));

    Harness {
        source,
        docs,
        local,
        session,
        cloud,
        coordinator,
    }
}
