use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};

use super::DocumentStore;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<ListedDocument>,
}

#[derive(Debug, Deserialize)]
struct ListedDocument {
    id: String,
    #[serde(default)]
    fields: Value,
}

#[derive(Debug, Deserialize)]
struct TimeResponse {
    time: DateTime<Utc>,
}

fn remote(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::RemoteStore(format!("{context}: {e}"))
}

/// Document store behind a REST document API.
///
/// `GET`/`PUT`/`DELETE {base}/documents/{path}` address one document, a
/// `GET` on a collection path returns `{"documents": [{"id", "fields"}]}`,
/// and `GET {base}/time` returns the server clock. Every request carries
/// the bearer token.
pub struct RestDocumentStore {
    client: Client,
    base_url: String,
    token: String,
}

impl RestDocumentStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("news-sync/1.0")
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn document_url(&self, path: &str) -> String {
        format!("{}/documents/{}", self.base_url, path.trim_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| remote(path, e))
    }

    fn check(response: &Response, path: &str) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteStore(format!("{path}: HTTP {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .send(self.client.get(self.document_url(path)), path)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check(&response, path)?;
        let doc = response.json().await.map_err(|e| remote(path, e))?;
        Ok(Some(doc))
    }

    async fn set(&self, path: &str, doc: Value) -> Result<()> {
        let response = self
            .send(self.client.put(self.document_url(path)).json(&doc), path)
            .await?;
        Self::check(&response, path)?;
        tracing::debug!("Wrote document {}", path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .send(self.client.delete(self.document_url(path)), path)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(&response, path)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let response = self
            .send(self.client.get(self.document_url(collection)), collection)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Self::check(&response, collection)?;
        let listed: ListResponse = response
            .json()
            .await
            .map_err(|e| remote(collection, e))?;
        Ok(listed
            .documents
            .into_iter()
            .map(|doc| (doc.id, doc.fields))
            .collect())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        let url = format!("{}/time", self.base_url);
        let response = self.send(self.client.get(url), "time").await?;
        Self::check(&response, "time")?;
        let body: TimeResponse = response.json().await.map_err(|e| remote("time", e))?;
        Ok(body.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> RestDocumentStore {
        RestDocumentStore::new(&server.uri(), "secret").unwrap()
    }

    #[tokio::test]
    async fn get_sends_token_and_maps_missing_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents/users/u1/preferences/userPrefs"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isDarkTheme": true})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/documents/users/u1/savedArticles/a1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        let prefs = store.get("users/u1/preferences/userPrefs").await.unwrap();
        assert_eq!(prefs, Some(json!({"isDarkTheme": true})));
        assert_eq!(store.get("users/u1/savedArticles/a1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_ids_with_fields() {
        let server = MockServer::start().await;
        let body = json!({
            "documents": [
                {"id": "a1", "fields": {"n": 1}},
                {"id": "a2", "fields": {"n": 2}}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/documents/users/u1/savedArticles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let docs = store(&server).list("users/u1/savedArticles").await.unwrap();
        assert_eq!(
            docs,
            vec![
                ("a1".to_string(), json!({"n": 1})),
                ("a2".to_string(), json!({"n": 2}))
            ]
        );
    }

    #[tokio::test]
    async fn failed_writes_are_remote_store_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = store(&server);
        let err = store.set("users/u1/savedArticles/a1", json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteStore(_)));
        assert!(err.is_recoverable_remote());
        assert!(matches!(
            store.delete("users/u1/savedArticles/a1").await,
            Err(AppError::RemoteStore(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_remote_store_error() {
        let store = RestDocumentStore::new("http://127.0.0.1:9", "secret").unwrap();
        assert!(matches!(
            store.server_time().await,
            Err(AppError::RemoteStore(_))
        ));
    }

    #[tokio::test]
    async fn server_time_parses_the_clock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/time"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"time": "2024-05-01T10:00:00Z"})),
            )
            .mount(&server)
            .await;

        let time = store(&server).server_time().await.unwrap();
        assert_eq!(time.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
