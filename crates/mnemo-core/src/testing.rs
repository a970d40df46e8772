//! Test doubles shared by the unit tests in this crate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, LongTermStore, ScoredItem, SummarizationProvider};
use crate::retrieval::SearchFilters;
use crate::store::InMemoryStore;
use crate::types::{ImportanceLevel, ImportanceScore, MemoryItem};
use crate::vector;

/// Give an item a fixed tier without running the scorer.
pub fn scored(mut item: MemoryItem, level: ImportanceLevel) -> MemoryItem {
    item.set_importance(ImportanceScore {
        score: level.weight(),
        level,
    });
    item
}

/// Bag-of-words embedder: one hashed bucket per lowercase word.
pub struct KeywordEmbedder {
    dimension: usize,
    pub calls: AtomicU32,
    pub fail: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let words: std::collections::HashSet<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_lowercase())
            .collect();
        for word in words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        vector::normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::transient("keyword", "rate limited"));
        }
        Ok(self.vector(text))
    }
}

/// Always fails with a transient error.
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::transient("failing", "503 service unavailable"))
    }
}

/// Joins inputs with a space and cuts at `max_len`.
pub struct JoinSummarizer;

#[async_trait]
impl SummarizationProvider for JoinSummarizer {
    fn name(&self) -> &str {
        "join"
    }

    async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String> {
        Ok(texts.join(" ").chars().take(max_len).collect())
    }
}

/// Store whose every call fails as unreachable.
pub struct UnavailableStore;

#[async_trait]
impl LongTermStore for UnavailableStore {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn dimension(&self) -> usize {
        256
    }

    async fn store(&self, _item: &MemoryItem) -> Result<String> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn query(
        &self,
        _project_id: &str,
        _embedding: &[f32],
        _filters: &SearchFilters,
        _k: usize,
    ) -> Result<Vec<ScoredItem>> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn get(&self, _project_id: &str, _id: &str) -> Result<Option<MemoryItem>> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn delete(&self, _project_id: &str, _id: &str) -> Result<bool> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn list(&self, _project_id: &str) -> Result<Vec<MemoryItem>> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn count(&self, _project_id: &str) -> Result<usize> {
        Err(Error::store_unavailable("connection refused"))
    }

    async fn record_access(&self, _project_id: &str, _ids: &[String]) -> Result<()> {
        Err(Error::store_unavailable("connection refused"))
    }
}

/// In-memory store that parks every write after it lands until released.
pub struct GatedStore {
    pub inner: InMemoryStore,
    pub written: Notify,
    pub release: Notify,
}

impl GatedStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: InMemoryStore::new(dimension),
            written: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl LongTermStore for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn store(&self, item: &MemoryItem) -> Result<String> {
        let id = self.inner.store(item).await?;
        self.written.notify_one();
        self.release.notified().await;
        Ok(id)
    }

    async fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredItem>> {
        self.inner.query(project_id, embedding, filters, k).await
    }

    async fn get(&self, project_id: &str, id: &str) -> Result<Option<MemoryItem>> {
        self.inner.get(project_id, id).await
    }

    async fn delete(&self, project_id: &str, id: &str) -> Result<bool> {
        self.inner.delete(project_id, id).await
    }

    async fn list(&self, project_id: &str) -> Result<Vec<MemoryItem>> {
        self.inner.list(project_id).await
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        self.inner.count(project_id).await
    }

    async fn record_access(&self, project_id: &str, ids: &[String]) -> Result<()> {
        self.inner.record_access(project_id, ids).await
    }
}
