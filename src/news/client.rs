use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{normalize_tags, Article, ArticleList};

use super::ArticleSource;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "news", alias = "articles")]
    results: Vec<ApiArticle>,
    #[serde(default, rename = "totalResults", alias = "total_results")]
    total_results: Option<u64>,
}

// Providers disagree on field names; every variant gets its own slot so a
// payload carrying two of them does not fail with a duplicate-field error.
#[derive(Debug, Default, Deserialize)]
struct ApiArticle {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    article_id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source: Option<Value>,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    keywords: Option<Value>,
    #[serde(default)]
    language: Option<String>,
}

fn first_non_empty(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn value_to_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a single string, a comma-separated string or an array of strings.
fn value_to_tags(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => normalize_tags(s.split(',')),
        Some(Value::Array(items)) => normalize_tags(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string)),
        ),
        _ => Vec::new(),
    }
}

fn source_name(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("name").and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Host of the article URL without a leading `www.`.
fn host_of(article_url: &str) -> Option<String> {
    let parsed = url::Url::parse(article_url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}

impl ApiArticle {
    fn into_article(self) -> Option<Article> {
        let article_url = first_non_empty([self.url, self.link]);
        let id = value_to_id(self.id)
            .or_else(|| value_to_id(self.article_id))
            .or_else(|| article_url.clone())?;

        let source = first_non_empty([source_name(self.source), self.source_id])
            .or_else(|| article_url.as_deref().and_then(host_of))
            .unwrap_or_else(|| "Unknown".to_string());

        let author = first_non_empty([
            self.author,
            self.authors.map(|authors| authors.join(", ")),
        ]);

        let keywords = value_to_tags(self.keywords);

        Some(Article {
            id,
            title: first_non_empty([self.title]).unwrap_or_else(|| "Untitled".to_string()),
            content: first_non_empty([self.content, self.text, self.description]),
            source,
            author,
            published_at: first_non_empty([self.published_at, self.publish_date, self.pub_date])
                .unwrap_or_default(),
            image_url: first_non_empty([self.image_url, self.image]),
            categories: value_to_tags(self.category),
            article_url,
            keywords: (!keywords.is_empty()).then_some(keywords),
            language: first_non_empty([self.language]),
            ai_summary: None,
            ai_categories: Vec::new(),
            reliability_score: None,
            is_saved: false,
        })
    }
}

pub(crate) fn decode_response(body: &[u8]) -> Result<ArticleList> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| AppError::network(None, format!("malformed news response: {e}")))?;

    if let Some(status) = response.status.as_deref() {
        if status.eq_ignore_ascii_case("error") {
            return Err(AppError::network(None, "news API reported an error status"));
        }
    }

    let total = response.results.len();
    let articles: Vec<Article> = response
        .results
        .into_iter()
        .filter_map(ApiArticle::into_article)
        .collect();
    if articles.len() < total {
        tracing::debug!("Skipped {} articles without an id", total - articles.len());
    }

    Ok(ArticleList {
        articles,
        total_results: response.total_results,
    })
}

/// Client for the `search-news` endpoint. No caching, no retries.
pub struct NewsApiClient {
    client: Client,
    base_url: String,
    api_token: String,
    language: String,
}

impl NewsApiClient {
    pub fn new(base_url: &str, api_token: &str, language: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("news-sync/1.0")
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            language: language.to_string(),
        })
    }

    async fn search_news(&self, params: Vec<(&str, String)>) -> Result<ArticleList> {
        let response = self
            .client
            .get(format!("{}/search-news", self.base_url))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::network(
                Some(status.as_u16()),
                format!("failed to fetch articles: HTTP {status}"),
            ));
        }

        let bytes = response.bytes().await?;
        decode_response(&bytes)
    }

    fn base_params(&self, offset: u32, page_size: u32) -> Vec<(&'static str, String)> {
        vec![
            ("language", self.language.clone()),
            ("offset", offset.to_string()),
            ("number", page_size.to_string()),
            ("api-token", self.api_token.clone()),
        ]
    }
}

#[async_trait]
impl ArticleSource for NewsApiClient {
    async fn fetch(
        &self,
        category: Option<&str>,
        offset: u32,
        page_size: u32,
    ) -> Result<ArticleList> {
        let mut params = self.base_params(offset, page_size);
        if let Some(category) = category {
            params.push(("category", category.to_string()));
        }
        let list = self.search_news(params).await?;
        tracing::debug!(
            "Fetched {} articles for {:?} at offset {}",
            list.articles.len(),
            category,
            offset
        );
        Ok(list)
    }

    async fn search(&self, text: &str, offset: u32, page_size: u32) -> Result<ArticleList> {
        let mut params = self.base_params(offset, page_size);
        params.push(("text", text.to_string()));
        self.search_news(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_results_with_numeric_ids() {
        let body = br#"{
            "status": "ok",
            "totalResults": 42,
            "results": [{
                "id": 123,
                "title": "Chips",
                "text": "Body",
                "url": "https://www.example.com/chips",
                "image": "https://img.example.com/1.png",
                "publish_date": "2024-05-01 10:00:00",
                "authors": ["A", "B"],
                "category": "technology",
                "language": "en"
            }]
        }"#;

        let list = decode_response(body).unwrap();
        assert_eq!(list.total_results, Some(42));
        let article = &list.articles[0];
        assert_eq!(article.id, "123");
        assert_eq!(article.source, "example.com");
        assert_eq!(article.author.as_deref(), Some("A, B"));
        assert_eq!(article.categories, vec!["technology"]);
        assert_eq!(article.published_at, "2024-05-01 10:00:00");
        assert_eq!(article.image_url.as_deref(), Some("https://img.example.com/1.png"));
    }

    #[test]
    fn accepts_alternate_list_and_total_names() {
        let body = br#"{
            "total_results": 2,
            "news": [
                {"article_id": "x1", "title": "One", "source_id": "wire",
                 "description": "d", "content": "c", "pubDate": "2024-01-01",
                 "keywords": ["a", "b", "a"]},
                {"title": "No id, no url"}
            ]
        }"#;

        let list = decode_response(body).unwrap();
        assert_eq!(list.total_results, Some(2));
        assert_eq!(list.articles.len(), 1);
        let article = &list.articles[0];
        assert_eq!(article.id, "x1");
        assert_eq!(article.source, "wire");
        assert_eq!(article.content.as_deref(), Some("c"));
        assert_eq!(article.keywords, Some(vec!["a".to_string(), "b".to_string()]));

        let body = br#"{"articles": [{"id": "y", "source": {"name": "Daily"}}]}"#;
        let list = decode_response(body).unwrap();
        assert_eq!(list.articles[0].source, "Daily");
        assert_eq!(list.articles[0].title, "Untitled");
    }

    #[test]
    fn empty_results_are_not_an_error() {
        let list = decode_response(br#"{"status": "ok", "results": []}"#).unwrap();
        assert!(list.articles.is_empty());
    }

    #[test]
    fn malformed_body_is_a_network_error() {
        let err = decode_response(b"<html>").unwrap_err();
        assert!(matches!(err, AppError::Network { status: None, .. }));
        let err = decode_response(br#"{"status": "error"}"#).unwrap_err();
        assert!(matches!(err, AppError::Network { .. }));
    }
}
