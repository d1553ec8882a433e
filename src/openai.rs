//! OpenAI-compatible content store and index provider.
//!
//! Blobs are uploaded through the Files API and indexes are vector stores.
//! Both traits are implemented by one [`OpenAiProvider`] sharing a client
//! and an API key.
//!
//! # Retry Strategy
//!
//! Every request is retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry
//! - 401/403 → `Authentication`, no retry
//! - 404 → `NotFound`, except on removals where it means "already gone"
//! - other 4xx → `ProviderUnavailable`, no retry

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use repo_index_sync_core::provider::{ContentStore, IndexProvider, Upload};
use repo_index_sync_core::{FileMetadata, Result, SyncError};

use crate::config::ProviderConfig;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

/// What a request expects when the target may already be gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missing {
    Error,
    Ok,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Fails when the API key environment variable is unset.
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &ProviderConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built fresh for every attempt. Returns `None` when
    /// the target was missing and `missing` is [`Missing::Ok`].
    async fn send<F>(
        &self,
        what: &str,
        missing: Missing,
        build: F,
    ) -> Result<Option<reqwest::Response>>
    where
        F: Fn() -> Result<RequestBuilder> + Send + Sync,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let request = build()?
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if status == StatusCode::NOT_FOUND && missing == Missing::Ok {
                        return Ok(None);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if is_retryable(status) {
                        tracing::warn!(what, status = status.as_u16(), attempt, "provider request failed, retrying");
                        last_err = Some(SyncError::ProviderUnavailable(format!(
                            "{}: HTTP {}: {}",
                            what, status, body
                        )));
                        continue;
                    }
                    return Err(status_error(status, what, &body));
                }
                Err(e) => {
                    tracing::warn!(what, attempt, error = %e, "provider request failed, retrying");
                    last_err = Some(SyncError::Network(format!("{}: {}", what, e)));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| SyncError::ProviderUnavailable(format!("{}: retries exhausted", what))))
    }

    async fn send_for_id<F>(&self, what: &str, build: F) -> Result<String>
    where
        F: Fn() -> Result<RequestBuilder> + Send + Sync,
    {
        let response = self
            .send(what, Missing::Error, build)
            .await?
            .ok_or_else(|| SyncError::NotFound(what.to_string()))?;
        let body: IdResponse = response
            .json()
            .await
            .map_err(|e| SyncError::ProviderUnavailable(format!("{}: invalid response: {}", what, e)))?;
        Ok(body.id)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn status_error(status: StatusCode, what: &str, body: &str) -> SyncError {
    match status.as_u16() {
        401 | 403 => SyncError::auth("index provider", format!("{}: HTTP {}", what, status)),
        404 => SyncError::NotFound(what.to_string()),
        _ => SyncError::ProviderUnavailable(format!("{}: HTTP {}: {}", what, status, body)),
    }
}

#[async_trait]
impl ContentStore for OpenAiProvider {
    async fn upload(&self, upload: &Upload<'_>) -> Result<String> {
        let what = format!("upload {}", upload.relative_path);
        let url = self.url("/files");
        let id = self
            .send_for_id(&what, || {
                let part = Part::bytes(upload.bytes.to_vec())
                    .file_name(upload.file_name.clone())
                    .mime_str("text/plain")
                    .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))?;
                let form = Form::new()
                    .text("purpose", upload.purpose.as_str())
                    .part("file", part);
                Ok(self.client.post(&url).multipart(form))
            })
            .await?;
        tracing::debug!(path = upload.relative_path, resource = upload.resource_id, content_id = %id, "uploaded");
        Ok(id)
    }

    async fn delete(&self, content_id: &str) -> Result<()> {
        let url = self.url(&format!("/files/{}", content_id));
        let found = self
            .send(&format!("delete file {}", content_id), Missing::Ok, || {
                Ok(self.client.request(Method::DELETE, &url))
            })
            .await?;
        if found.is_none() {
            tracing::debug!(content_id, "blob already deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl IndexProvider for OpenAiProvider {
    async fn create_index(&self, name: &str, description: &str) -> Result<String> {
        let url = self.url("/vector_stores");
        let body = json!({
            "name": name,
            "metadata": { "description": description },
        });
        self.send_for_id(&format!("create index {}", name), || {
            Ok(self.client.post(&url).json(&body))
        })
        .await
    }

    async fn add_member(
        &self,
        index_id: &str,
        content_id: &str,
        metadata: &FileMetadata,
    ) -> Result<()> {
        let url = self.url(&format!("/vector_stores/{}/files", index_id));
        let body = json!({
            "file_id": content_id,
            "attributes": metadata.attributes(),
        });
        self.send(
            &format!("add {} to {}", content_id, index_id),
            Missing::Error,
            || Ok(self.client.post(&url).json(&body)),
        )
        .await?;
        Ok(())
    }

    async fn remove_member(&self, index_id: &str, content_id: &str) -> Result<()> {
        let url = self.url(&format!("/vector_stores/{}/files/{}", index_id, content_id));
        self.send(
            &format!("remove {} from {}", content_id, index_id),
            Missing::Ok,
            || Ok(self.client.request(Method::DELETE, &url)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "x", ""),
            SyncError::Authentication { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "x", ""),
            SyncError::Authentication { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "x", ""),
            SyncError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "x", "bad"),
            SyncError::ProviderUnavailable(_)
        ));
    }

    #[test]
    fn new_requires_api_key() {
        let config = ProviderConfig {
            api_key_env: "RIS_TEST_DEFINITELY_UNSET_KEY".into(),
            ..ProviderConfig::default()
        };
        assert!(OpenAiProvider::new(&config).is_err());
        let provider = OpenAiProvider::with_key(&config, "k".into()).unwrap();
        assert_eq!(provider.url("/files"), "https://api.openai.com/v1/files");
    }

    #[tokio::test]
    async fn unreachable_provider_is_transient() {
        let config = ProviderConfig {
            base_url: "http://127.0.0.1:9".into(),
            max_retries: 0,
            timeout_secs: 2,
            ..ProviderConfig::default()
        };
        let provider = OpenAiProvider::with_key(&config, "k".into()).unwrap();
        let err = provider.create_index("vsCode", "d").await.unwrap_err();
        assert!(err.is_transient());
    }
}
