use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{scoped_key, CacheSet};
use crate::config::EmbeddingsConfig;
use crate::embeddings::{CircuitBreaker, EmbeddingApiClient};
use crate::error::{DocentError, Result};

/// Embedding access for the whole pipeline.
///
/// Every call goes through the same layering, outermost first: circuit
/// breaker, then bounded retry, then a per-attempt timeout around the single
/// HTTP call. The breaker is consulted once per operation, not per retry
/// attempt, so an open circuit refuses work without burning retries.
pub struct EmbeddingService {
    client: EmbeddingApiClient,
    caches: Arc<CacheSet>,
    breaker: CircuitBreaker,
    config: EmbeddingsConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingsConfig, caches: Arc<CacheSet>) -> Result<Self> {
        let client = EmbeddingApiClient::new((&config).into())?;
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown_secs);
        Ok(Self {
            client,
            caches,
            breaker,
            config,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Embed a single text. Errors propagate; callers that must not fail use
    /// [`embed_batch`](Self::embed_batch) or catch at their own level.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_guarded(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| DocentError::Embedding("Provider returned no embedding".to_string()))
    }

    /// Embed a query string with caching. The cache key is scoped to the
    /// tenant so identical questions from different workspaces never share
    /// an entry.
    pub async fn embed_query(
        &self,
        query: &str,
        workspace_id: &str,
        bot_id: Option<&str>,
    ) -> Result<Vec<f32>> {
        let key = scoped_key(query, workspace_id, bot_id);
        if let Some(vector) = self.caches.embeddings.get(&key) {
            debug!(workspace_id, "query embedding cache hit");
            return Ok(vector);
        }

        let vector = self.embed(query).await?;
        self.caches.embeddings.set(key, vector.clone());
        Ok(vector)
    }

    /// Embed many texts for indexing. Input order is preserved.
    ///
    /// Texts are sent in batches of `batch_size` with a short pause between
    /// batches. When a whole batch fails, each of its items is retried
    /// individually; items that still fail get a zero vector so one poisoned
    /// text cannot sink a document sync. Zero vectors match nothing at
    /// query time.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(self.config.batch_size).enumerate() {
            if i > 0 && self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }

            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            match self.embed_guarded(&refs).await {
                Ok(vectors) => all.extend(vectors),
                Err(e) => {
                    warn!(batch = i, error = %e, "batch embedding failed, retrying items individually");
                    for text in batch {
                        match self.embed_guarded(&[text.as_str()]).await {
                            Ok(mut vectors) => match vectors.pop() {
                                Some(vector) => all.push(vector),
                                None => all.push(self.zero_vector()),
                            },
                            Err(e) => {
                                warn!(error = %e, "item embedding failed, substituting zero vector");
                                all.push(self.zero_vector());
                            }
                        }
                    }
                }
            }
        }

        Ok(all)
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.config.dimensions]
    }

    /// Breaker check, then up to `max_retries + 1` attempts with exponential
    /// backoff, each attempt bounded by the embedding timeout budget.
    async fn embed_guarded(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.breaker.is_open() {
            return Err(DocentError::BreakerOpen(format!(
                "embedding provider, {} consecutive failures",
                self.breaker.consecutive_failures()
            )));
        }

        let budget = Duration::from_secs(self.config.timeout_secs);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let outcome = match tokio::time::timeout(budget, self.client.embed(texts)).await {
                Ok(result) => result,
                Err(_) => Err(DocentError::Timeout {
                    operation: "embedding",
                    budget,
                }),
            };

            match outcome {
                Ok(vectors) => {
                    self.breaker.record_success();
                    return Ok(vectors);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "embedding attempt failed");
                    let retryable = e.kind().is_retryable();
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.breaker.record_failure();
        Err(last_err
            .unwrap_or_else(|| DocentError::Embedding("Embedding failed".to_string())))
    }
}
