use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_news_api_url")]
    pub news_api_url: String,
    pub news_api_token: Option<String>,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_minutes: u64,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_max_search_history")]
    pub max_search_history: usize,

    pub claude_api_key: Option<String>,

    /// Base URL of the per-user document API. Without it the binary runs
    /// as a guest against an in-process store.
    pub cloud_api_url: Option<String>,
    pub cloud_api_token: Option<String>,
    pub user_id: Option<String>,
}

/// Resolved document API account.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAccount<'a> {
    pub url: &'a str,
    pub token: &'a str,
    pub user_id: &'a str,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("news-sync");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("news_cache.db").to_string_lossy().to_string()
}

fn default_news_api_url() -> String {
    "https://api.worldnewsapi.com".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_page_size() -> u32 {
    10
}

fn default_cache_ttl() -> u64 {
    24 * 60
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_max_search_history() -> usize {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            news_api_url: default_news_api_url(),
            news_api_token: None,
            language: default_language(),
            page_size: default_page_size(),
            cache_ttl_minutes: default_cache_ttl(),
            auth_timeout_secs: default_auth_timeout(),
            max_search_history: default_max_search_history(),
            claude_api_key: None,
            cloud_api_url: None,
            cloud_api_token: None,
            user_id: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("news-sync")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(AppError::Config("page_size must be at least 1".to_string()));
        }
        if self.max_search_history == 0 {
            return Err(AppError::Config(
                "max_search_history must be at least 1".to_string(),
            ));
        }
        self.cloud_account()?;
        Ok(())
    }

    /// `None` when no document API is configured; an error when it is only
    /// partly configured.
    pub fn cloud_account(&self) -> Result<Option<CloudAccount<'_>>> {
        let Some(url) = self.cloud_api_url.as_deref() else {
            return Ok(None);
        };
        match (self.cloud_api_token.as_deref(), self.user_id.as_deref()) {
            (Some(token), Some(user_id)) if !user_id.trim().is_empty() => Ok(Some(CloudAccount {
                url,
                token,
                user_id: user_id.trim(),
            })),
            _ => Err(AppError::Config(
                "cloud_api_url needs cloud_api_token and user_id".to_string(),
            )),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}
