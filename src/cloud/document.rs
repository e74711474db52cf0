use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};

/// Remote per-user document database (users/{uid}/... hierarchy).
///
/// Paths are slash-separated; a collection path has an odd number of
/// segments and a document path an even number. Implementations report
/// every failure as `AppError::RemoteStore`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    async fn set(&self, path: &str, doc: Value) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Direct children of `collection` as `(document id, document)` pairs.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Clock of the store, used for `savedAt`/`readAt`/`timestamp` fields.
    async fn server_time(&self) -> Result<DateTime<Utc>>;

    /// Returns the stored document, creating it from `default` first when absent.
    async fn get_or_create(&self, path: &str, default: Value) -> Result<Value> {
        if let Some(existing) = self.get(path).await? {
            return Ok(existing);
        }
        self.set(path, default.clone()).await?;
        Ok(default)
    }
}

pub(crate) const SAVED_ARTICLES: &str = "savedArticles";
pub(crate) const READING_HISTORY: &str = "readingHistory";
pub(crate) const SEARCH_HISTORY: &str = "searchHistory";
pub(crate) const PREFERENCES_DOC: &str = "preferences/userPrefs";

pub(crate) fn user_doc(uid: &str) -> String {
    format!("users/{}", document_id(uid))
}

pub(crate) fn user_collection(uid: &str, collection: &str) -> String {
    format!("{}/{}", user_doc(uid), collection)
}

pub(crate) fn user_document(uid: &str, collection: &str, id: &str) -> String {
    format!("{}/{}", user_collection(uid, collection), document_id(id))
}

/// Article ids can be URLs; percent-encode so an id is always one path segment.
pub(crate) fn document_id(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes()).collect()
}

pub(crate) fn decode_document<T: DeserializeOwned>(path: &str, doc: Value) -> Result<T> {
    serde_json::from_value(doc)
        .map_err(|e| AppError::RemoteStore(format!("malformed document {path}: {e}")))
}

pub(crate) fn encode_document<T: Serialize>(path: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::RemoteStore(format!("cannot encode document {path}: {e}")))
}
