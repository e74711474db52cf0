use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::ai::ArticleAnalyzer;
use crate::cloud::UserCloudStore;
use crate::config::Config;
use crate::db::LocalStore;
use crate::error::{AppError, Result};
use crate::models::{Article, CachedArticle, RecommendationSignals, UserPreference};
use crate::news::ArticleSource;

use super::pagination::{CategoryKey, PageTicket, PaginationCache, PaginationState};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub page_size: u32,
    pub cache_ttl: Duration,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size.max(1),
            cache_ttl: config.cache_ttl(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Inverse of one optimistic list edit.
#[derive(Default)]
struct Undo {
    inserted: Option<String>,
    removed: Vec<(usize, Article)>,
}

impl Undo {
    fn inserted(id: &str) -> Self {
        Self {
            inserted: Some(id.to_string()),
            ..Self::default()
        }
    }

    fn removed(removed: Vec<(usize, Article)>) -> Self {
        Self {
            removed,
            ..Self::default()
        }
    }

    /// Touches only the ids this edit changed. Removed entries go back at
    /// their old index, clamped to the current length, unless the id has
    /// reappeared meanwhile.
    fn apply(self, list: &mut Vec<Article>) {
        if let Some(id) = self.inserted {
            take_entry(list, &id);
        }
        for (index, article) in self.removed {
            if list.iter().any(|a| a.id == article.id) {
                continue;
            }
            let index = index.min(list.len());
            list.insert(index, article);
        }
    }
}

fn take_entry(list: &mut Vec<Article>, id: &str) -> Vec<(usize, Article)> {
    list.iter()
        .position(|a| a.id == id)
        .map(|index| (index, list.remove(index)))
        .into_iter()
        .collect()
}

/// Reconciles the news API, the local cache and the user cloud store.
///
/// Owns no durable data. List screens read the pagination buckets; the
/// saved and history lists are optimistic copies that are rolled back when
/// the durable write fails, with the failure published on `errors()`.
pub struct SyncCoordinator {
    source: Arc<dyn ArticleSource>,
    cloud: Arc<UserCloudStore>,
    local: Arc<LocalStore>,
    analyzer: Option<Arc<dyn ArticleAnalyzer>>,
    options: SyncOptions,

    pagination: PaginationCache,
    by_id: Mutex<HashMap<String, Article>>,
    saved: Mutex<Vec<Article>>,
    history: Mutex<Vec<Article>>,
    errors: watch::Sender<Option<String>>,
}

impl SyncCoordinator {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        cloud: Arc<UserCloudStore>,
        local: Arc<LocalStore>,
        options: SyncOptions,
    ) -> Self {
        let (errors, _rx) = watch::channel(None);
        Self {
            source,
            cloud,
            local,
            analyzer: None,
            options,
            pagination: PaginationCache::new(),
            by_id: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            errors,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ArticleAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Post-launch startup: waits (bounded) for the auth check, then loads
    /// the saved and history lists from whichever store is reachable.
    pub async fn start(&self, auth_timeout: Duration) -> Result<()> {
        let uid = self.cloud.session().wait_until_resolved(auth_timeout).await;
        tracing::info!("Starting sync as {}", uid.as_deref().unwrap_or("guest"));
        self.refresh_saved().await?;
        self.refresh_history().await?;
        Ok(())
    }

    // Error channel

    /// Latest user-facing error message, `None` once dismissed.
    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.errors.subscribe()
    }

    pub fn dismiss_error(&self) {
        self.errors.send_replace(None);
    }

    fn report(&self, message: String) {
        tracing::error!("{}", message);
        self.errors.send_replace(Some(message));
    }

    // Category pages

    pub fn category_state(&self, category: Option<&str>) -> PaginationState {
        self.pagination.snapshot(&category.map(str::to_string))
    }

    pub fn pagination(&self) -> &PaginationCache {
        &self.pagination
    }

    /// Fresh load of the first page. A bucket that is already loaded is
    /// left alone unless `force` is set.
    pub async fn load_category(&self, category: Option<&str>, force: bool) -> Result<()> {
        let key: CategoryKey = category.map(str::to_string);
        let Some(ticket) = self.pagination.begin_fresh(&key, None, force) else {
            tracing::debug!("Category {:?} already loaded", key);
            return Ok(());
        };

        if let Err(e) = self.local.purge_expired(self.options.cache_ttl).await {
            tracing::warn!("Skipping cache purge: {}", e);
        }
        self.run_page(ticket).await
    }

    /// Appends the next page; a no-op unless the bucket is loaded and no
    /// other load-more is in flight for it.
    pub async fn load_more(&self, category: Option<&str>) -> Result<()> {
        let key: CategoryKey = category.map(str::to_string);
        let Some(ticket) = self.pagination.begin_load_more(&key) else {
            tracing::debug!("Load more for {:?} not eligible", key);
            return Ok(());
        };
        self.run_page(ticket).await
    }

    /// Re-issues a forced fresh load, keeping the bucket's search text.
    pub async fn retry(&self, category: Option<&str>) -> Result<()> {
        let key: CategoryKey = category.map(str::to_string);
        let query = self.pagination.snapshot(&key).query;
        let Some(ticket) = self.pagination.begin_fresh(&key, query, true) else {
            return Ok(());
        };
        self.run_page(ticket).await
    }

    /// Searches into the uncategorized bucket and records the query for a
    /// signed-in user.
    pub async fn search(&self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }

        if self.cloud.session().current_user_id().is_some() {
            if let Err(e) = self.cloud.add_search_query(query).await {
                tracing::warn!("Search history not updated: {}", e);
            }
        }

        let Some(ticket) = self
            .pagination
            .begin_fresh(&None, Some(query.to_string()), false)
        else {
            return Ok(());
        };
        self.run_page(ticket).await
    }

    async fn run_page(&self, ticket: PageTicket) -> Result<()> {
        let offset = ticket.offset(self.options.page_size);
        let page_size = self.options.page_size;
        let fetched = match &ticket.query {
            Some(text) => self.source.search(text, offset, page_size).await,
            None => {
                self.source
                    .fetch(ticket.key.as_deref(), offset, page_size)
                    .await
            }
        };

        let mut articles = match fetched {
            Ok(list) => list.articles,
            Err(e) => {
                tracing::warn!("Fetch for {:?} failed: {}", ticket.key, e);
                self.pagination.fail(&ticket, e.to_string(), e.status_code());
                return Err(e);
            }
        };

        {
            let saved = lock(&self.saved);
            for article in &mut articles {
                article.is_saved = saved.iter().any(|s| s.id == article.id);
            }
        }

        let records = articles.iter().cloned().map(CachedArticle::now).collect();
        if let Err(e) = self.local.upsert_many(records).await {
            self.pagination.fail(&ticket, e.to_string(), None);
            return Err(e);
        }

        if let Some(appended) = self.pagination.complete(&ticket, articles) {
            tracing::debug!("Appended {} articles to {:?}", appended.len(), ticket.key);
            let mut by_id = lock(&self.by_id);
            for article in appended {
                by_id.insert(article.id.clone(), article);
            }
        }
        Ok(())
    }

    // Single articles

    /// Freshest known copy: the in-memory cache, then the local store (which
    /// ignores TTL so a detail view works on stale rows).
    pub async fn article(&self, id: &str) -> Result<Option<Article>> {
        if let Some(article) = lock(&self.by_id).get(id).cloned() {
            return Ok(Some(article));
        }
        let Some(record) = self.local.get_by_id(id).await? else {
            return Ok(None);
        };
        lock(&self.by_id).insert(id.to_string(), record.article.clone());
        Ok(Some(record.article))
    }

    pub async fn cached_by_ai_category(&self, tag: &str) -> Result<Vec<Article>> {
        Ok(self
            .local
            .query_by_ai_category(tag, self.options.cache_ttl)
            .await?
            .into_iter()
            .map(|record| record.article)
            .collect())
    }

    fn update_cached(&self, id: &str, update: impl Fn(&mut Article)) {
        let updated = {
            let mut by_id = lock(&self.by_id);
            by_id.get_mut(id).map(|article| {
                update(article);
                article.clone()
            })
        };
        if let Some(article) = updated {
            self.pagination.update_article(&article);
        }
    }

    // Optimistic mutations

    /// Applies `mutate` to the in-memory list, then awaits the durable write.
    /// On failure only this edit is reverted, so concurrent edits to other
    /// ids survive.
    async fn optimistic<F>(
        &self,
        list: &Mutex<Vec<Article>>,
        mutate: impl FnOnce(&mut Vec<Article>) -> Undo,
        durable: F,
        action: &str,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let undo = mutate(&mut *lock(list));

        match durable.await {
            Ok(()) => Ok(()),
            Err(e) => {
                undo.apply(&mut *lock(list));
                self.report(format!("Could not {action}: {e}"));
                Err(e)
            }
        }
    }

    pub fn saved_articles(&self) -> Vec<Article> {
        lock(&self.saved).clone()
    }

    pub fn is_saved(&self, id: &str) -> bool {
        lock(&self.saved).iter().any(|a| a.id == id)
    }

    /// Replaces the saved list with the cloud store's view (which falls back
    /// to the local cache on its own).
    pub async fn refresh_saved(&self) -> Result<()> {
        match self.cloud.list_saved().await {
            Ok(articles) => {
                for article in &articles {
                    self.update_cached(&article.id, |a| a.is_saved = true);
                }
                *lock(&self.saved) = articles;
                Ok(())
            }
            Err(e) => {
                self.report(format!("Could not load saved articles: {e}"));
                Err(e)
            }
        }
    }

    pub async fn save_article(&self, article: &Article) -> Result<()> {
        if self.is_saved(&article.id) {
            return Ok(());
        }

        let mut saved = article.clone();
        saved.is_saved = true;
        self.optimistic(
            &self.saved,
            |list| {
                list.insert(0, saved);
                Undo::inserted(&article.id)
            },
            self.cloud.save_article(article),
            "save article",
        )
        .await?;

        self.update_cached(&article.id, |a| a.is_saved = true);
        Ok(())
    }

    pub async fn unsave_article(&self, id: &str) -> Result<()> {
        self.optimistic(
            &self.saved,
            |list| Undo::removed(take_entry(list, id)),
            self.cloud.unsave_article(id),
            "remove saved article",
        )
        .await?;

        self.update_cached(id, |a| a.is_saved = false);
        Ok(())
    }

    /// Returns the new saved state.
    pub async fn toggle_saved(&self, article: &Article) -> Result<bool> {
        if self.is_saved(&article.id) {
            self.unsave_article(&article.id).await?;
            Ok(false)
        } else {
            self.save_article(article).await?;
            Ok(true)
        }
    }

    pub fn history(&self) -> Vec<Article> {
        lock(&self.history).clone()
    }

    pub async fn refresh_history(&self) -> Result<()> {
        match self.cloud.list_history().await {
            Ok(articles) => {
                *lock(&self.history) = articles;
                Ok(())
            }
            Err(e) => {
                self.report(format!("Could not load reading history: {e}"));
                Err(e)
            }
        }
    }

    /// Moves the article to the top of the history. Guests keep a
    /// device-only history in the local cache.
    pub async fn record_read(&self, article: &Article) -> Result<()> {
        let signed_in = self.cloud.session().current_user_id().is_some();
        let durable = async {
            if signed_in {
                self.cloud.add_to_history(article).await
            } else {
                self.local
                    .record_read(article.clone(), Utc::now().timestamp_millis())
                    .await
            }
        };

        let entry = article.clone();
        self.optimistic(
            &self.history,
            |list| {
                let mut undo = Undo::removed(take_entry(list, &article.id));
                undo.inserted = Some(article.id.clone());
                list.insert(0, entry);
                undo
            },
            durable,
            "update reading history",
        )
        .await
    }

    pub async fn remove_from_history(&self, id: &str) -> Result<()> {
        self.optimistic(
            &self.history,
            |list| Undo::removed(take_entry(list, id)),
            self.cloud.remove_from_history(id),
            "remove history entry",
        )
        .await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.optimistic(
            &self.history,
            |list| Undo::removed(list.drain(..).enumerate().collect()),
            self.cloud.clear_history(),
            "clear reading history",
        )
        .await
    }

    // Preferences

    pub async fn preferences(&self) -> Result<UserPreference> {
        self.cloud.get_or_create_preferences().await
    }

    pub async fn set_dark_theme(&self, dark: bool) -> Result<()> {
        self.cloud.set_dark_theme(dark).await.inspect_err(|e| {
            self.report(format!("Could not update theme: {e}"));
        })
    }

    pub async fn set_preferred_categories(&self, categories: Vec<String>) -> Result<()> {
        self.cloud
            .set_preferred_categories(categories)
            .await
            .inspect_err(|e| {
                self.report(format!("Could not update categories: {e}"));
            })
    }

    pub async fn recommendation_signals(&self) -> Result<RecommendationSignals> {
        self.cloud.recommendation_signals().await
    }

    // Analyzer enrichment

    fn analyzer(&self) -> Result<&Arc<dyn ArticleAnalyzer>> {
        self.analyzer
            .as_ref()
            .ok_or_else(|| AppError::Config("no article analyzer configured".to_string()))
    }

    async fn require_article(&self, id: &str) -> Result<Article> {
        self.article(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {id}")))
    }

    /// Cached summary when there is one, otherwise a new one stored locally.
    pub async fn summarize_article(&self, id: &str) -> Result<String> {
        let analyzer = self.analyzer()?;
        let article = self.require_article(id).await?;
        if let Some(summary) = article.ai_summary.as_deref().filter(|s| !s.is_empty()) {
            return Ok(summary.to_string());
        }

        let summary = analyzer.summarize(&article.analysis_text()).await?;
        self.local.set_ai_summary(id, &summary).await?;
        self.update_cached(id, |a| a.ai_summary = Some(summary.clone()));
        Ok(summary)
    }

    pub async fn classify_article(&self, id: &str) -> Result<Vec<String>> {
        let analyzer = self.analyzer()?;
        let article = self.require_article(id).await?;

        let tags = crate::models::normalize_tags(analyzer.classify(&article.analysis_text()).await?);
        self.local.set_ai_categories(id, &tags).await?;
        self.update_cached(id, |a| a.ai_categories = tags.clone());
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<Article> {
        ids.iter().map(|id| Article::new(*id, "t", "s")).collect()
    }

    fn ids(list: &[Article]) -> Vec<&str> {
        list.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn undo_leaves_other_edits_in_place() {
        let mut saved = list(&["b"]);
        saved.insert(0, Article::new("a", "t", "s"));
        let undo = Undo::inserted("a");
        saved.insert(0, Article::new("c", "t", "s"));

        undo.apply(&mut saved);
        assert_eq!(ids(&saved), vec!["c", "b"]);
    }

    #[test]
    fn undo_reinserts_removed_entries_near_their_old_place() {
        let mut history = list(&["a", "b", "c"]);
        let undo = Undo::removed(take_entry(&mut history, "b"));
        take_entry(&mut history, "c");

        undo.apply(&mut history);
        assert_eq!(ids(&history), vec!["a", "b"]);

        let mut history = list(&["a", "b"]);
        let undo = Undo::removed(history.drain(..).enumerate().collect());
        history.push(Article::new("b", "t", "s"));
        undo.apply(&mut history);
        assert_eq!(ids(&history), vec!["a", "b"]);
    }
}
