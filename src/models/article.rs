use serde::{Deserialize, Serialize};

/// A news article as it moves between the news API, the local cache and the
/// user cloud store. `id` identifies the same logical article in all three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub published_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability_score: Option<f64>,

    // Device-local flag, never part of a cloud document
    #[serde(skip)]
    pub is_saved: bool,
}

impl Article {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: None,
            source: source.into(),
            author: None,
            published_at: String::new(),
            image_url: None,
            categories: Vec::new(),
            article_url: None,
            keywords: None,
            language: None,
            ai_summary: None,
            ai_categories: Vec::new(),
            reliability_score: None,
            is_saved: false,
        }
    }

    /// Text handed to the analyzer: title plus body when there is one.
    pub fn analysis_text(&self) -> String {
        match &self.content {
            Some(content) if !content.trim().is_empty() => {
                format!("{}\n\n{}", self.title, content)
            }
            _ => self.title.clone(),
        }
    }
}

/// A row of the local cache: the article plus its insertion/refresh time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArticle {
    pub article: Article,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl CachedArticle {
    pub fn new(article: Article, timestamp: i64) -> Self {
        Self { article, timestamp }
    }

    pub fn now(article: Article) -> Self {
        Self::new(article, chrono::Utc::now().timestamp_millis())
    }

    /// Comma-joined AI tags as stored in the `ai_category` column.
    pub fn ai_category(&self) -> String {
        join_tags(&self.article.ai_categories)
    }
}

/// A page of articles returned by the news API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleList {
    pub articles: Vec<Article>,
    pub total_results: Option<u64>,
}

/// Trims, drops empties and removes later duplicates while keeping order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

pub fn split_tags(joined: &str) -> Vec<String> {
    normalize_tags(joined.split(','))
}
