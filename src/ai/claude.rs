use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::normalize_tags;

use super::ArticleAnalyzer;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";
const MAX_INPUT_CHARS: usize = 10_000;
const MAX_TAGS: usize = 3;

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct ClaudeAnalyzer {
    client: Client,
    api_key: String,
    api_url: String,
}

impl ClaudeAnalyzer {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            api_url: CLAUDE_API_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url;
        self
    }

    pub fn model_version(&self) -> &'static str {
        CLAUDE_MODEL
    }

    async fn complete(&self, system: &str, user_message: String, max_tokens: u32) -> Result<String> {
        let request = MessageRequest {
            model: CLAUDE_MODEL.to_string(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(system.to_string()),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::AiApi(format!("API error: {}", error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        Ok(message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Cuts on a char boundary so multi-byte text never panics.
fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parses a comma or newline separated tag reply into lowercase tags.
fn parse_tags(reply: &str) -> Vec<String> {
    let tags: Vec<String> = reply
        .split([',', '\n'])
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != ' ').to_lowercase())
        .collect();
    normalize_tags(tags).into_iter().take(MAX_TAGS).collect()
}

#[async_trait]
impl ArticleAnalyzer for ClaudeAnalyzer {
    async fn classify(&self, text: &str) -> Result<Vec<String>> {
        let system = "Classify the news article into at most three short topic tags. \
                      Reply with the tags only, comma separated.";
        let reply = self.complete(system, truncate(text).to_string(), 64).await?;
        Ok(parse_tags(&reply))
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let system = "Summarize the news article in 2-3 short paragraphs, \
                      keeping the key facts and conclusions.";
        let summary = self
            .complete(system, truncate(text).to_string(), 1024)
            .await?;
        Ok(summary.trim().to_string())
    }
}
