//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use mnemo_core::{EmbeddingProvider, Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::HttpEmbedderConfig;
use crate::error::{SdkError, SdkResult};

const NAME: &str = "http";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote embedding provider.
///
/// Rate limits (429), server errors (5xx), timeouts and connection failures
/// are reported as transient so the provider gate retries them.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> SdkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdkError::invalid_operation(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            dimension,
        })
    }

    pub fn from_config(
        config: &HttpEmbedderConfig,
        dimension: usize,
        timeout_ms: u64,
    ) -> SdkResult<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            dimension,
            Duration::from_millis(timeout_ms),
        )
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("{} returned {}: {}", NAME, status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::transient(NAME, message)
    } else {
        Error::provider(NAME, message)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn name(&self) -> &str {
        NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: [text],
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::transient(NAME, e.to_string())
            } else {
                Error::provider(NAME, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(NAME, format!("invalid response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::provider(NAME, "response contained no embedding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::ErrorKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down").kind(),
            ErrorKind::TransientProvider
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "").kind(),
            ErrorKind::TransientProvider
        );
        assert!(!status_error(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let embedder =
            HttpEmbedder::new("http://localhost:8080/v1/", "m", None, 8, Duration::from_secs(1))
                .unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.dimension(), 8);
    }
}
