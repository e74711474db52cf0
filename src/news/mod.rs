mod client;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ArticleList;

pub use client::NewsApiClient;

/// Stateless page fetch from the external news provider.
///
/// An empty page is a valid "no results"; transport and HTTP failures are
/// reported as `AppError::Network`.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch(&self, category: Option<&str>, offset: u32, page_size: u32)
        -> Result<ArticleList>;

    async fn search(&self, text: &str, offset: u32, page_size: u32) -> Result<ArticleList>;
}
