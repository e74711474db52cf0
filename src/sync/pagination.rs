//! In-memory per-category article lists and page cursors.
//!
//! Each category bucket moves through its own load state independently of
//! the others; `None` is the uncategorized bucket used for search results.
//! Nothing here is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::models::Article;

pub type CategoryKey = Option<String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Success,
    Error {
        message: String,
        status: Option<u16>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationState {
    pub articles: Vec<Article>,
    pub state: LoadState,
    /// Pages appended since the last fresh load (1 after a fresh load).
    pub page: u32,
    pub is_loading_more: bool,
    /// Search text for the uncategorized bucket.
    pub query: Option<String>,
    generation: u64,
}

impl PaginationState {
    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Fresh,
    More,
}

/// A claimed page fetch. Completing a ticket from a superseded fresh load is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub key: CategoryKey,
    pub kind: PageKind,
    /// Zero-based page to request.
    pub page_index: u32,
    pub query: Option<String>,
    generation: u64,
}

impl PageTicket {
    pub fn offset(&self, page_size: u32) -> u32 {
        self.page_index.saturating_mul(page_size)
    }
}

pub struct PaginationCache {
    buckets: Mutex<HashMap<CategoryKey, PaginationState>>,
    changes: watch::Sender<u64>,
}

impl Default for PaginationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationCache {
    pub fn new() -> Self {
        let (changes, _rx) = watch::channel(0);
        Self {
            buckets: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CategoryKey, PaginationState>> {
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Change counter bumped on every state transition of any bucket.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self, key: &CategoryKey) -> PaginationState {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    /// Claims a fresh load. Returns `None` when the bucket is already loaded
    /// or loading for the same query and the load is not forced.
    pub fn begin_fresh(
        &self,
        key: &CategoryKey,
        query: Option<String>,
        force: bool,
    ) -> Option<PageTicket> {
        let ticket = {
            let mut buckets = self.lock();
            let bucket = buckets.entry(key.clone()).or_default();

            let busy = matches!(bucket.state, LoadState::Success | LoadState::Loading);
            if busy && !force && bucket.query == query {
                return None;
            }

            bucket.generation = bucket.generation.wrapping_add(1);
            bucket.articles.clear();
            bucket.page = 1;
            bucket.is_loading_more = false;
            bucket.query = query;
            bucket.state = LoadState::Loading;

            PageTicket {
                key: key.clone(),
                kind: PageKind::Fresh,
                page_index: 0,
                query: bucket.query.clone(),
                generation: bucket.generation,
            }
        };
        self.notify();
        Some(ticket)
    }

    /// Claims the next page. Only one load-more per bucket may be in flight,
    /// and only after a successful load.
    pub fn begin_load_more(&self, key: &CategoryKey) -> Option<PageTicket> {
        let ticket = {
            let mut buckets = self.lock();
            let bucket = buckets.get_mut(key)?;
            if !bucket.is_loaded() || bucket.is_loading_more {
                return None;
            }
            bucket.is_loading_more = true;

            PageTicket {
                key: key.clone(),
                kind: PageKind::More,
                page_index: bucket.page,
                query: bucket.query.clone(),
                generation: bucket.generation,
            }
        };
        self.notify();
        Some(ticket)
    }

    /// Appends a fetched page. Returns the articles actually appended, or
    /// `None` when the ticket was superseded.
    pub fn complete(&self, ticket: &PageTicket, articles: Vec<Article>) -> Option<Vec<Article>> {
        let appended = {
            let mut buckets = self.lock();
            let bucket = buckets.get_mut(&ticket.key)?;
            if bucket.generation != ticket.generation {
                return None;
            }

            let mut seen: HashSet<String> = bucket.articles.iter().map(|a| a.id.clone()).collect();
            let appended: Vec<Article> = articles
                .into_iter()
                .filter(|a| seen.insert(a.id.clone()))
                .collect();
            bucket.articles.extend(appended.iter().cloned());

            if ticket.kind == PageKind::More {
                bucket.page += 1;
                bucket.is_loading_more = false;
            }
            bucket.state = LoadState::Success;
            appended
        };
        self.notify();
        Some(appended)
    }

    /// Moves the bucket to the error state. Returns false for a superseded ticket.
    pub fn fail(&self, ticket: &PageTicket, message: String, status: Option<u16>) -> bool {
        {
            let mut buckets = self.lock();
            let Some(bucket) = buckets.get_mut(&ticket.key) else {
                return false;
            };
            if bucket.generation != ticket.generation {
                return false;
            }
            bucket.is_loading_more = false;
            bucket.state = LoadState::Error { message, status };
        }
        self.notify();
        true
    }

    /// Replaces an article in every bucket that lists it.
    pub fn update_article(&self, article: &Article) {
        let mut changed = false;
        for bucket in self.lock().values_mut() {
            for existing in bucket.articles.iter_mut().filter(|a| a.id == article.id) {
                *existing = article.clone();
                changed = true;
            }
        }
        if changed {
            self.notify();
        }
    }
}
