//! Capability boundaries and the provider gate.
//!
//! Embedding, summarization and long-term storage are pluggable. The engine
//! only talks to them through the traits below, and every embedding or
//! summarization call goes through [`Providers`], which applies:
//! - a global cap on concurrent calls (semaphore)
//! - a per-call timeout
//! - exponential backoff with jitter for retryable failures

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{Error, Result};
use crate::retrieval::SearchFilters;
use crate::types::MemoryItem;
use crate::vector;

/// Text embedding capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Fixed output dimension.
    fn dimension(&self) -> usize;

    /// Embed one text. Rate limits and timeouts should surface as
    /// [`Error::TransientProvider`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Text summarization capability.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Summarize `texts` into at most `max_len` characters. Best effort.
    async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String>;
}

/// Long-term store result row.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: MemoryItem,
    /// Cosine similarity to the query embedding.
    pub similarity: f32,
}

/// Durable, embedding-indexed storage partitioned by project.
///
/// Implementations must keep each project in its own collection, rank by
/// cosine similarity, reject embeddings of the wrong dimension, and treat a
/// write with an existing id as an upsert.
#[async_trait]
pub trait LongTermStore: Send + Sync {
    fn name(&self) -> &str;

    /// Embedding dimension accepted on write.
    fn dimension(&self) -> usize;

    /// Upsert an item that carries an embedding. Returns its id.
    async fn store(&self, item: &MemoryItem) -> Result<String>;

    /// Top `k` items of the project by cosine similarity, after filtering.
    async fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredItem>>;

    async fn get(&self, project_id: &str, id: &str) -> Result<Option<MemoryItem>>;

    /// Returns whether the id existed.
    async fn delete(&self, project_id: &str, id: &str) -> Result<bool>;

    /// Every item of the project, oldest first.
    async fn list(&self, project_id: &str) -> Result<Vec<MemoryItem>>;

    async fn count(&self, project_id: &str) -> Result<usize>;

    /// Increment access counts. Unknown ids are ignored.
    async fn record_access(&self, project_id: &str, ids: &[String]) -> Result<()>;
}

/// Retry policy for provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter = if self.jitter {
            base * rand::thread_rng().gen_range(0.0..=0.1)
        } else {
            0.0
        };
        let delay = (base + jitter).min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(delay as u64)
    }
}

/// Limits applied by the provider gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLimits {
    /// Concurrent embedding + summarization calls across all projects.
    pub max_concurrent_calls: usize,
    pub call_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            call_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderLimits {
    pub fn validate(&self) -> std::result::Result<(), (&'static str, String)> {
        if self.max_concurrent_calls == 0 {
            return Err(("providers.max_concurrent_calls", "must be greater than 0".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(("providers.call_timeout_ms", "must be greater than 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(("providers.retry.max_attempts", "must be at least 1".into()));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(("providers.retry.backoff_multiplier", "must be at least 1.0".into()));
        }
        Ok(())
    }
}

/// Gate around the embedding and summarization providers.
pub struct Providers {
    embedder: Arc<dyn EmbeddingProvider>,
    summarizer: Arc<dyn SummarizationProvider>,
    limits: ProviderLimits,
    semaphore: Arc<Semaphore>,
}

impl Providers {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        summarizer: Arc<dyn SummarizationProvider>,
        limits: ProviderLimits,
    ) -> Self {
        let permits = limits.max_concurrent_calls.max(1);
        Self {
            embedder,
            summarizer,
            limits,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    /// Embed text, validating the returned dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let embedding = self
            .call(embedder.name(), "embed", || {
                let embedder = Arc::clone(&embedder);
                let text = text.to_string();
                async move { embedder.embed(&text).await }
            })
            .await?;
        vector::validate_dimension(&embedding, self.embedder.dimension())?;
        Ok(embedding)
    }

    /// Summarize texts. The result is cut to `max_len` characters if the
    /// provider overshoots.
    pub async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String> {
        let summarizer = Arc::clone(&self.summarizer);
        let summary = self
            .call(summarizer.name(), "summarize", || {
                let summarizer = Arc::clone(&summarizer);
                let texts = texts.to_vec();
                async move { summarizer.summarize(&texts, max_len).await }
            })
            .await?;

        if summary.chars().count() > max_len {
            warn!(
                provider = summarizer.name(),
                max_len, "Summary exceeded maximum length, truncating"
            );
            return Ok(summary.chars().take(max_len).collect());
        }
        Ok(summary)
    }

    async fn call<T, F, Fut>(&self, provider: &str, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.limits.retry;
        let timeout = Duration::from_millis(self.limits.call_timeout_ms);
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::cancelled("provider gate closed"))?;

                match tokio::time::timeout(timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::transient(
                        provider,
                        format!("{} timed out after {} ms", op, self.limits.call_timeout_ms),
                    )),
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = policy.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        provider,
                        op,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
