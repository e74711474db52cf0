use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::auth::Session;
use crate::db::LocalStore;
use crate::error::{AppError, Result};
use crate::models::{
    normalize_query, Article, CachedArticle, HistoryEntry, PreferenceDocument,
    RecommendationSignals, SavedEntry, SearchHistoryEntry, UserPreference, UserProfile,
};

use super::document::{
    decode_document, encode_document, user_collection, user_doc, user_document, DocumentStore,
    PREFERENCES_DOC, READING_HISTORY, SAVED_ARTICLES, SEARCH_HISTORY,
};

pub const MAX_HISTORY_ITEMS: usize = 20;
pub const RECOMMENDATION_QUERY_LIMIT: usize = 10;

/// Per-user remote state, authoritative while a user is signed in.
///
/// Every operation requires a signed-in user and fails with
/// `NotAuthenticated` before touching the document store, except the saved
/// and history read paths, which serve the local cache in guest mode and
/// whenever the remote read fails.
pub struct UserCloudStore {
    docs: Arc<dyn DocumentStore>,
    local: Arc<LocalStore>,
    session: Session,
    max_search_history: usize,
}

impl UserCloudStore {
    pub fn new(docs: Arc<dyn DocumentStore>, local: Arc<LocalStore>, session: Session) -> Self {
        Self {
            docs,
            local,
            session,
            max_search_history: MAX_HISTORY_ITEMS,
        }
    }

    pub fn with_max_search_history(mut self, max: usize) -> Self {
        self.max_search_history = max.max(1);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn uid(&self) -> Result<String> {
        self.session
            .current_user_id()
            .ok_or(AppError::NotAuthenticated)
    }

    // Saved articles

    /// Write-through: the local row must be written before the remote entry
    /// is attempted. Saving an already saved article is a success.
    pub async fn save_article(&self, article: &Article) -> Result<()> {
        let uid = self.uid()?;
        let was_saved = self.locally_saved(&article.id).await?;

        let mut local = article.clone();
        local.is_saved = true;
        self.local.upsert_many(vec![CachedArticle::now(local)]).await?;

        if let Err(e) = self.save_remote(&uid, article).await {
            if !was_saved {
                self.restore_saved_flag(&article.id, false).await;
            }
            return Err(e);
        }
        tracing::info!("Saved article {}", article.id);
        Ok(())
    }

    async fn save_remote(&self, uid: &str, article: &Article) -> Result<()> {
        let path = user_document(uid, SAVED_ARTICLES, &article.id);
        if self.docs.get(&path).await?.is_some() {
            tracing::debug!("Article {} already saved remotely", article.id);
            return Ok(());
        }

        let entry = SavedEntry {
            article: article.clone(),
            saved_at: self.docs.server_time().await?,
        };
        self.docs.set(&path, encode_document(&path, &entry)?).await
    }

    /// Local flag first; a local failure aborts before the remote delete.
    pub async fn unsave_article(&self, id: &str) -> Result<()> {
        let uid = self.uid()?;
        let was_saved = self.locally_saved(id).await?;
        self.local.set_saved(id, false).await?;

        if let Err(e) = self
            .docs
            .delete(&user_document(&uid, SAVED_ARTICLES, id))
            .await
        {
            if was_saved {
                self.restore_saved_flag(id, true).await;
            }
            return Err(e);
        }
        tracing::info!("Removed saved article {}", id);
        Ok(())
    }

    async fn locally_saved(&self, id: &str) -> Result<bool> {
        Ok(self
            .local
            .get_by_id(id)
            .await?
            .is_some_and(|record| record.article.is_saved))
    }

    /// Puts the local flag back after the remote half of a toggle failed.
    async fn restore_saved_flag(&self, id: &str, saved: bool) {
        if let Err(e) = self.local.set_saved(id, saved).await {
            tracing::warn!("Could not restore saved flag for {}: {}", id, e);
        }
    }

    /// Remote list mirrored into the local cache, or the local saved rows in
    /// guest mode and when the remote read fails.
    pub async fn list_saved(&self) -> Result<Vec<Article>> {
        let Ok(uid) = self.uid() else {
            tracing::debug!("Not signed in, serving saved articles from local cache");
            return self.local_saved().await;
        };

        match self.remote_saved(&uid).await {
            Ok(articles) => {
                self.mirror_saved(&articles).await?;
                Ok(articles)
            }
            Err(e) if e.is_recoverable_remote() => {
                tracing::warn!("Saved articles unavailable remotely, using local cache: {}", e);
                self.local_saved().await
            }
            Err(e) => Err(e),
        }
    }

    async fn local_saved(&self) -> Result<Vec<Article>> {
        Ok(self
            .local
            .query_saved()
            .await?
            .into_iter()
            .map(|record| record.article)
            .collect())
    }

    async fn remote_saved(&self, uid: &str) -> Result<Vec<Article>> {
        let collection = user_collection(uid, SAVED_ARTICLES);
        let mut entries = self
            .docs
            .list(&collection)
            .await?
            .into_iter()
            .map(|(id, doc)| decode_document::<SavedEntry>(&format!("{collection}/{id}"), doc))
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut article = entry.article;
                article.is_saved = true;
                article
            })
            .collect())
    }

    /// Remote is the source of truth: cache every remote entry as saved and
    /// clear the flag on local rows the remote no longer has.
    async fn mirror_saved(&self, articles: &[Article]) -> Result<()> {
        let remote_ids: HashSet<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        let stale: Vec<String> = self
            .local
            .query_saved()
            .await?
            .into_iter()
            .map(|record| record.article.id)
            .filter(|id| !remote_ids.contains(id.as_str()))
            .collect();

        self.local
            .upsert_many(articles.iter().cloned().map(CachedArticle::now).collect())
            .await?;
        for id in &stale {
            self.local.set_saved(id, false).await?;
        }
        Ok(())
    }

    // Reading history

    /// Local mirror first; a rejected remote write puts the mirror back to
    /// its earlier state.
    pub async fn add_to_history(&self, article: &Article) -> Result<()> {
        let uid = self.uid()?;
        let previous = self.local.history_read_at(&article.id).await?;
        self.local
            .record_read(article.clone(), Utc::now().timestamp_millis())
            .await?;

        if let Err(e) = self.add_history_remote(&uid, article).await {
            self.restore_history(&article.id, previous).await;
            return Err(e);
        }
        Ok(())
    }

    async fn add_history_remote(&self, uid: &str, article: &Article) -> Result<()> {
        let path = user_document(uid, READING_HISTORY, &article.id);
        if self.docs.get(&path).await?.is_some() {
            return Ok(());
        }

        let entry = HistoryEntry {
            article: article.clone(),
            read_at: self.docs.server_time().await?,
        };
        self.docs.set(&path, encode_document(&path, &entry)?).await
    }

    async fn restore_history(&self, id: &str, read_at: Option<i64>) {
        if let Err(e) = self.local.restore_history(id, read_at).await {
            tracing::warn!("Could not restore history entry for {}: {}", id, e);
        }
    }

    /// Most recently read first, one entry per article id.
    pub async fn list_history(&self) -> Result<Vec<Article>> {
        let Ok(uid) = self.uid() else {
            return self.local.query_history().await;
        };

        match self.remote_history(&uid).await {
            Ok(entries) => {
                for entry in &entries {
                    self.local
                        .record_read(entry.article.clone(), entry.read_at.timestamp_millis())
                        .await?;
                }
                Ok(entries.into_iter().map(|e| e.article).collect())
            }
            Err(e) if e.is_recoverable_remote() => {
                tracing::warn!("Reading history unavailable remotely, using local cache: {}", e);
                self.local.query_history().await
            }
            Err(e) => Err(e),
        }
    }

    async fn remote_history(&self, uid: &str) -> Result<Vec<HistoryEntry>> {
        let collection = user_collection(uid, READING_HISTORY);
        let mut entries = self
            .docs
            .list(&collection)
            .await?
            .into_iter()
            .map(|(id, doc)| decode_document::<HistoryEntry>(&format!("{collection}/{id}"), doc))
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| b.read_at.cmp(&a.read_at));

        let mut seen = HashSet::new();
        entries.retain(|entry| seen.insert(entry.article.id.clone()));
        Ok(entries)
    }

    pub async fn remove_from_history(&self, id: &str) -> Result<()> {
        let uid = self.uid()?;
        let previous = self.local.history_read_at(id).await?;
        self.local.remove_history(id).await?;

        if let Err(e) = self
            .docs
            .delete(&user_document(&uid, READING_HISTORY, id))
            .await
        {
            if previous.is_some() {
                self.restore_history(id, previous).await;
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<()> {
        let uid = self.uid()?;
        self.local.clear_history().await?;
        let collection = user_collection(&uid, READING_HISTORY);
        for (id, _) in self.docs.list(&collection).await? {
            self.docs.delete(&format!("{collection}/{id}")).await?;
        }
        Ok(())
    }

    // Preferences

    fn preferences_path(uid: &str) -> String {
        format!("{}/{}", user_doc(uid), PREFERENCES_DOC)
    }

    /// Reads the preferences document, creating it with defaults when absent.
    pub async fn get_or_create_preferences(&self) -> Result<UserPreference> {
        let uid = self.uid()?;
        let path = Self::preferences_path(&uid);
        let default = PreferenceDocument {
            prefs: UserPreference::default(),
            updated_at: Some(self.docs.server_time().await?),
        };
        let doc = self
            .docs
            .get_or_create(&path, encode_document(&path, &default)?)
            .await?;
        Ok(decode_document::<PreferenceDocument>(&path, doc)?.prefs)
    }

    async fn read_preferences(&self, path: &str) -> Result<UserPreference> {
        match self.docs.get(path).await? {
            Some(doc) => Ok(decode_document::<PreferenceDocument>(path, doc)?.prefs),
            None => Ok(UserPreference::default()),
        }
    }

    async fn write_preferences(&self, path: &str, prefs: UserPreference) -> Result<()> {
        let doc = PreferenceDocument {
            prefs,
            updated_at: Some(self.docs.server_time().await?),
        };
        self.docs.set(path, encode_document(path, &doc)?).await
    }

    /// Keeps the stored categories; only the theme flag changes.
    pub async fn set_dark_theme(&self, dark: bool) -> Result<()> {
        let uid = self.uid()?;
        let path = Self::preferences_path(&uid);
        let mut prefs = self.read_preferences(&path).await?;
        prefs.is_dark_theme = dark;
        self.write_preferences(&path, prefs).await
    }

    /// Keeps the stored theme flag; only the categories change.
    pub async fn set_preferred_categories(&self, categories: Vec<String>) -> Result<()> {
        let uid = self.uid()?;
        let path = Self::preferences_path(&uid);
        let mut prefs = self.read_preferences(&path).await?;
        prefs.categories = crate::models::normalize_tags(categories);
        self.write_preferences(&path, prefs).await
    }

    /// Preferred categories and up to ten recent queries. A failure in one
    /// half leaves it `None` without affecting the other.
    pub async fn recommendation_signals(&self) -> Result<RecommendationSignals> {
        let uid = self.uid()?;
        let path = Self::preferences_path(&uid);

        let (prefs, searches) =
            futures::future::join(self.docs.get(&path), self.search_entries(&uid)).await;

        let preferred_categories = match prefs {
            Ok(Some(doc)) => match decode_document::<PreferenceDocument>(&path, doc) {
                Ok(doc) => Some(doc.prefs.categories),
                Err(e) => {
                    tracing::warn!("Ignoring preferences for recommendations: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Preferences unavailable for recommendations: {}", e);
                None
            }
        };

        let recent_queries = match searches {
            Ok(entries) => Some(
                entries
                    .into_iter()
                    .take(RECOMMENDATION_QUERY_LIMIT)
                    .map(|e| e.query)
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!("Search history unavailable for recommendations: {}", e);
                None
            }
        };

        Ok(RecommendationSignals {
            preferred_categories,
            recent_queries,
        })
    }

    // Search history

    async fn search_entries(&self, uid: &str) -> Result<Vec<SearchHistoryEntry>> {
        let collection = user_collection(uid, SEARCH_HISTORY);
        let mut entries = self
            .docs
            .list(&collection)
            .await?
            .into_iter()
            .map(|(id, doc)| -> Result<SearchHistoryEntry> {
                let mut entry: SearchHistoryEntry =
                    decode_document(&format!("{collection}/{id}"), doc)?;
                entry.id = id;
                Ok(entry)
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Records a query, replacing an earlier entry with the same normalized
    /// text, then evicts the oldest entries beyond the cap.
    pub async fn add_search_query(&self, query: &str) -> Result<()> {
        let uid = self.uid()?;
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Ok(());
        }

        let collection = user_collection(&uid, SEARCH_HISTORY);
        for entry in self.search_entries(&uid).await? {
            if normalize_query(&entry.query) == normalized {
                self.docs.delete(&format!("{collection}/{}", entry.id)).await?;
            }
        }

        let path = format!("{collection}/{}", uuid::Uuid::new_v4().simple());
        let entry = SearchHistoryEntry {
            id: String::new(),
            query: query.trim().to_string(),
            timestamp: self.docs.server_time().await?,
        };
        self.docs.set(&path, encode_document(&path, &entry)?).await?;

        let entries = self.search_entries(&uid).await?;
        for stale in entries.iter().skip(self.max_search_history) {
            self.docs.delete(&format!("{collection}/{}", stale.id)).await?;
        }
        Ok(())
    }

    /// Newest first.
    pub async fn list_search_history(&self) -> Result<Vec<SearchHistoryEntry>> {
        let uid = self.uid()?;
        self.search_entries(&uid).await
    }

    pub async fn delete_search_query(&self, query: &str) -> Result<()> {
        let uid = self.uid()?;
        let normalized = normalize_query(query);
        let collection = user_collection(&uid, SEARCH_HISTORY);

        let matching: Vec<_> = self
            .search_entries(&uid)
            .await?
            .into_iter()
            .filter(|entry| normalize_query(&entry.query) == normalized)
            .collect();
        if matching.is_empty() {
            return Err(AppError::NotFound(format!("search query '{}'", query.trim())));
        }

        for entry in matching {
            self.docs.delete(&format!("{collection}/{}", entry.id)).await?;
        }
        Ok(())
    }

    pub async fn clear_search_history(&self) -> Result<()> {
        let uid = self.uid()?;
        let collection = user_collection(&uid, SEARCH_HISTORY);
        for (id, _) in self.docs.list(&collection).await? {
            self.docs.delete(&format!("{collection}/{id}")).await?;
        }
        Ok(())
    }

    // Device sessions

    async fn profile(&self, path: &str) -> Result<UserProfile> {
        match self.docs.get(path).await? {
            Some(doc) => decode_document(path, doc),
            None => Ok(UserProfile::default()),
        }
    }

    pub async fn register_device(&self, device_id: &str) -> Result<()> {
        let uid = self.uid()?;
        let path = user_doc(&uid);
        let mut profile = self.profile(&path).await?;
        if !profile.device_ids.iter().any(|d| d == device_id) {
            profile.device_ids.push(device_id.to_string());
        }
        profile.is_logged_in = true;
        self.docs.set(&path, encode_document(&path, &profile)?).await
    }

    pub async fn sign_out_device(&self, device_id: &str) -> Result<()> {
        let uid = self.uid()?;
        let path = user_doc(&uid);
        let mut profile = self.profile(&path).await?;
        profile.device_ids.retain(|d| d != device_id);
        profile.is_logged_in = !profile.device_ids.is_empty();
        self.docs.set(&path, encode_document(&path, &profile)?).await
    }
}
