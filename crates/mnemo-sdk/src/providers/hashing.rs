use async_trait::async_trait;
use mnemo_core::vector::normalize;
use mnemo_core::{EmbeddingProvider, Result};
use sha2::{Digest, Sha256};

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token of two or more characters is hashed into
/// one of `dimension` buckets and the counts are unit-normalized, so texts
/// sharing vocabulary have a positive cosine similarity and unrelated texts
/// land near zero. Output is stable across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimension as u64) as usize
    }

    /// Embedding of `text`, computed synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let mut any = false;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
        {
            v[self.bucket(&token.to_lowercase())] += 1.0;
            any = true;
        }
        if !any {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                v[self.bucket(trimmed)] = 1.0;
            }
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}
