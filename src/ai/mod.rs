mod claude;

use async_trait::async_trait;

use crate::error::Result;

pub use claude::ClaudeAnalyzer;

/// Black-box text analysis used to enrich cached articles.
#[async_trait]
pub trait ArticleAnalyzer: Send + Sync {
    /// Category tags for the text, most relevant first.
    async fn classify(&self, text: &str) -> Result<Vec<String>>;

    async fn summarize(&self, text: &str) -> Result<String>;
}
