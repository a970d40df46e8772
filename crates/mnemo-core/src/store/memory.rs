use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{collection_name, rank_rows, validate_write};
use crate::error::Result;
use crate::providers::{LongTermStore, ScoredItem};
use crate::retrieval::SearchFilters;
use crate::types::{ItemState, MemoryItem, validate_project_id};
use crate::vector::cosine_similarity;

/// Process-local long-term store.
#[derive(Debug)]
pub struct InMemoryStore {
    dimension: usize,
    collections: RwLock<HashMap<String, HashMap<String, MemoryItem>>>,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn store(&self, item: &MemoryItem) -> Result<String> {
        validate_write(item, self.dimension)?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(collection_name(item.project_id()))
            .or_default();

        let mut next = item.clone();
        if let Some(existing) = collection.get(&item.id) {
            next.access_count = next.access_count.max(existing.access_count);
            if existing.state() == ItemState::Retained
                && next.state().can_transition_to(ItemState::Retained)
            {
                next.transition(ItemState::Retained)?;
            }
        }
        collection.insert(item.id.clone(), next);
        Ok(item.id.clone())
    }

    async fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<ScoredItem>> {
        validate_project_id(project_id)?;
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&collection_name(project_id)) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<ScoredItem> = collection
            .values()
            .filter(|item| filters.matches(item))
            .filter_map(|item| {
                let similarity = cosine_similarity(embedding, item.embedding.as_deref()?);
                Some(ScoredItem {
                    item: item.clone(),
                    similarity,
                })
            })
            .collect();
        rank_rows(&mut rows);
        rows.truncate(k);
        Ok(rows)
    }

    async fn get(&self, project_id: &str, id: &str) -> Result<Option<MemoryItem>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_name(project_id))
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn delete(&self, project_id: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection_name(project_id))
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, project_id: &str) -> Result<Vec<MemoryItem>> {
        let collections = self.collections.read().await;
        let mut items: Vec<MemoryItem> = collections
            .get(&collection_name(project_id))
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_name(project_id))
            .map(|c| c.len())
            .unwrap_or(0))
    }

    async fn record_access(&self, project_id: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(&collection_name(project_id)) {
            for id in ids {
                if let Some(item) = collection.get_mut(id) {
                    item.access_count = item.access_count.saturating_add(1);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scored;
    use crate::types::{ImportanceLevel, MemoryMetadata};
    use chrono::{Duration, Utc};

    fn item(project: &str, content: &str, embedding: Vec<f32>) -> MemoryItem {
        let mut it = MemoryItem::new(content, MemoryMetadata::new(project), Utc::now());
        it.embedding = Some(embedding);
        scored(it, ImportanceLevel::Medium)
    }

    #[tokio::test]
    async fn test_store_and_query_ranked() {
        let store = InMemoryStore::new(2);
        store.store(&item("demo", "east", vec![1.0, 0.0])).await.unwrap();
        store.store(&item("demo", "north", vec![0.0, 1.0])).await.unwrap();
        store.store(&item("demo", "north-east", vec![0.7, 0.7])).await.unwrap();

        let rows = store
            .query("demo", &[1.0, 0.0], &SearchFilters::default(), 2)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item.content(), "east");
        assert_eq!(rows[1].item.content(), "north-east");
        assert!(rows[0].similarity > rows[1].similarity);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryStore::new(2);
        let it = item("demo", "once", vec![1.0, 0.0]);
        store.store(&it).await.unwrap();
        store.record_access("demo", &[it.id.clone()]).await.unwrap();
        store.store(&it).await.unwrap();

        assert_eq!(store.count("demo").await.unwrap(), 1);
        let stored = store.get("demo", &it.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_retained_state() {
        let store = InMemoryStore::new(2);
        let mut it = item("demo", "pinned", vec![1.0, 0.0]);
        it.transition(ItemState::Consolidated).unwrap();
        let consolidated = it.clone();
        it.transition(ItemState::Retained).unwrap();
        store.store(&it).await.unwrap();

        store.store(&consolidated).await.unwrap();
        let stored = store.get("demo", &it.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), ItemState::Retained);
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let store = InMemoryStore::new(2);
        let it = item("alpha", "private", vec![1.0, 0.0]);
        store.store(&it).await.unwrap();

        let rows = store
            .query("beta", &[1.0, 0.0], &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(store.get("beta", &it.id).await.unwrap().is_none());
        assert!(!store.delete("beta", &it.id).await.unwrap());
        assert_eq!(store.count("alpha").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_embeddings() {
        let store = InMemoryStore::new(3);
        let err = store.store(&item("demo", "x", vec![1.0, 0.0])).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);

        let mut missing = item("demo", "y", vec![]);
        missing.embedding = None;
        assert!(store.store(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_filters_apply_before_k() {
        let store = InMemoryStore::new(2);
        store.store(&item("demo", "best", vec![1.0, 0.0])).await.unwrap();
        let mut tagged = item("demo", "tagged", vec![0.5, 0.5]);
        tagged.metadata.tags = vec!["api".into()];
        store.store(&tagged).await.unwrap();

        let filters = SearchFilters {
            tags: vec!["api".into()],
            ..Default::default()
        };
        let rows = store.query("demo", &[1.0, 0.0], &filters, 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item.content(), "tagged");
    }

    #[tokio::test]
    async fn test_list_oldest_first_and_delete() {
        let store = InMemoryStore::new(2);
        let mut old = item("demo", "old", vec![1.0, 0.0]);
        old.created_at = Utc::now() - Duration::days(3);
        let new = item("demo", "new", vec![1.0, 0.0]);
        store.store(&new).await.unwrap();
        store.store(&old).await.unwrap();

        let listed = store.list("demo").await.unwrap();
        assert_eq!(listed[0].content(), "old");

        assert!(store.delete("demo", &old.id).await.unwrap());
        assert_eq!(store.count("demo").await.unwrap(), 1);
    }
}
