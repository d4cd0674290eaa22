use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingsConfig;
use crate::error::{DocentError, Result};

#[derive(Debug, Clone)]
pub struct EmbeddingApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Transport-level timeout; the service applies its own per-operation
    /// budget on top.
    pub request_timeout_secs: u64,
}

impl From<&EmbeddingsConfig> for EmbeddingApiConfig {
    fn from(config: &EmbeddingsConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_timeout_secs: config.timeout_secs.max(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Single-attempt client for an OpenAI-style `/embeddings` endpoint.
///
/// Deliberately retry-free: the embedding service composes breaker, retry,
/// and timeout around this call in the required nesting order, so stacking a
/// second retry loop here would multiply attempts.
#[derive(Clone)]
pub struct EmbeddingApiClient {
    client: Client,
    config: EmbeddingApiConfig,
}

impl EmbeddingApiClient {
    pub fn new(config: EmbeddingApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DocentError::Embedding(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Embed a batch of texts, order-preserving. Never let the raw provider
    /// payload shape leak past this boundary.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts.to_vec(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|e| DocentError::Embedding(format!("Invalid API key header: {e}")))?,
            );
        }

        let url = format!("{}/embeddings", self.config.base_url);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocentError::Embedding(format!("Request failed: {e}")))?;

        let status = resp.status();

        if status.is_success() {
            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| DocentError::Embedding(format!("Failed to parse response: {e}")))?;

            let embeddings: Vec<Vec<f32>> = body.data.into_iter().map(|d| d.embedding).collect();
            if embeddings.len() != texts.len() {
                return Err(DocentError::Embedding(format!(
                    "Provider returned {} embeddings for {} inputs",
                    embeddings.len(),
                    texts.len()
                )));
            }
            return Ok(embeddings);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(DocentError::RateLimit { retry_after });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = resp.text().await.unwrap_or_default();
            return Err(DocentError::AuthExpired(body));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(DocentError::Embedding(format!(
            "API error {status}: {body}"
        )))
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}
