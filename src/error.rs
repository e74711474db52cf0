use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("network error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Network { status: Option<u16>, message: String },

    #[error("remote store error: {0}")]
    RemoteStore(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("local store error: {0}")]
    LocalStore(#[from] tokio_rusqlite::Error),

    #[error("local database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("AI API error: {0}")]
    AiApi(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by a network failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Remote failures that read paths recover from by serving the local cache.
    pub fn is_recoverable_remote(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RemoteStore(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        Self::network(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
