use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Article;

/// `users/{uid}/savedArticles/{articleId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEntry {
    pub article: Article,
    pub saved_at: DateTime<Utc>,
}

/// `users/{uid}/readingHistory/{articleId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub article: Article,
    pub read_at: DateTime<Utc>,
}

/// `users/{uid}/searchHistory/{randomId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    #[serde(skip)]
    pub id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

/// `users/{uid}/preferences/userPrefs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub is_dark_theme: bool,
}

/// Stored preferences document; `updatedAt` is written on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreferenceDocument {
    #[serde(flatten)]
    pub prefs: UserPreference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `users/{uid}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub device_ids: Vec<String>,
}

/// Inputs for the recommender. Either half may be missing without the other failing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationSignals {
    pub preferred_categories: Option<Vec<String>>,
    pub recent_queries: Option<Vec<String>>,
}

/// Canonical form used for search-history uniqueness.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
