//! Local sentence embeddings via `fastembed`.
//!
//! Uses all-MiniLM-L6-v2 (384 dimensions). The model is loaded on the first
//! call, so constructing the provider is cheap.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use mnemo_core::{EmbeddingProvider, Error, Result};
use tokio::sync::RwLock;

/// Embedding dimensions for all-MiniLM-L6-v2
pub const FASTEMBED_DIMENSION: usize = 384;

const NAME: &str = "fastembed";

/// Local embedding provider
pub struct FastEmbedder {
    model: Arc<RwLock<Option<TextEmbedding>>>,
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
        }
    }

    async fn ensure_model(&self) -> Result<()> {
        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| Error::provider(NAME, format!("failed to load model: {}", e)))?;

        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Embedding model loaded");
        *model_guard = Some(model);
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedder {
    fn name(&self) -> &str {
        NAME
    }

    fn dimension(&self) -> usize {
        FASTEMBED_DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_model().await?;

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or_else(|| Error::provider(NAME, "model not initialized"))?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| Error::provider(NAME, format!("failed to generate embedding: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(NAME, "no embedding generated"))
    }
}
