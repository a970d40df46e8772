//! Attention-weighted retrieval.
//!
//! Candidates come from the live buffer and from a long-term store query.
//! Each is scored as
//!
//! ```text
//! w_recency·recency + w_relevance·relevance + w_importance·tier_weight + w_frequency·ln(1 + access_count)
//! ```
//!
//! where recency decays exponentially with a configurable half-life and
//! relevance is the cosine similarity to the query clamped to `[0, 1]`.
//!
//! Search never fails because a dependency is down. If the store is
//! unreachable the result is buffer-only; if the query cannot be embedded,
//! relevance falls back to keyword overlap over buffer items.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::BufferRegistry;
use crate::error::{Error, Result};
use crate::providers::{LongTermStore, Providers};
use crate::types::{ImportanceLevel, MemoryItem, MemoryType, validate_project_id};
use crate::vector::cosine_similarity;

/// Ranking weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalWeights {
    pub recency: f64,
    pub relevance: f64,
    pub importance: f64,
    pub frequency: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            recency: 0.25,
            relevance: 0.40,
            importance: 0.25,
            frequency: 0.10,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub weights: RetrievalWeights,
    /// Candidates with a lower cosine similarity are excluded.
    pub similarity_threshold: f32,
    pub max_results_per_query: usize,
    /// Hard cap on `k` passed to the long-term store.
    pub store_k_cap: usize,
    /// Store candidates fetched per requested result.
    pub candidate_multiplier: usize,
    pub recency_half_life_hours: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: RetrievalWeights::default(),
            similarity_threshold: 0.3,
            max_results_per_query: 20,
            store_k_cap: 100,
            candidate_multiplier: 3,
            recency_half_life_hours: 24.0,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> std::result::Result<(), (&'static str, String)> {
        let w = &self.weights;
        for (name, value) in [
            ("retrieval.weights.recency", w.recency),
            ("retrieval.weights.relevance", w.relevance),
            ("retrieval.weights.importance", w.importance),
            ("retrieval.weights.frequency", w.frequency),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err((name, "must be a non-negative number".into()));
            }
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(("retrieval.similarity_threshold", "must be in [0, 1]".into()));
        }
        if self.max_results_per_query == 0 {
            return Err(("retrieval.max_results_per_query", "must be greater than 0".into()));
        }
        if self.store_k_cap == 0 {
            return Err(("retrieval.store_k_cap", "must be greater than 0".into()));
        }
        if self.candidate_multiplier == 0 {
            return Err(("retrieval.candidate_multiplier", "must be greater than 0".into()));
        }
        if !(self.recency_half_life_hours > 0.0) {
            return Err(("retrieval.recency_half_life_hours", "must be positive".into()));
        }
        Ok(())
    }

    /// Store `k` for a requested result count.
    pub fn store_k(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.candidate_multiplier)
            .clamp(1, self.store_k_cap)
    }
}

/// Metadata filters applied to both tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub agent_id: Option<String>,
    /// Any of these types. Empty means all.
    pub memory_types: Vec<MemoryType>,
    /// Items must carry every one of these tags.
    pub tags: Vec<String>,
    pub min_importance: Option<ImportanceLevel>,
}

impl SearchFilters {
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if let Some(agent) = &self.agent_id {
            if item.metadata.agent_id.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        if !self.memory_types.is_empty() && !self.memory_types.contains(&item.metadata.memory_type) {
            return false;
        }
        if !self.tags.iter().all(|t| item.metadata.has_tag(t)) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if item.importance_level() < min {
                return false;
            }
        }
        true
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Buffer,
    LongTerm,
}

/// Raw signal values behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub relevance: f64,
    pub importance: f64,
    pub frequency: f64,
}

/// Weighted sum of the signals.
pub fn blend(weights: &RetrievalWeights, b: &ScoreBreakdown) -> f64 {
    weights.recency * b.recency
        + weights.relevance * b.relevance
        + weights.importance * b.importance
        + weights.frequency * b.frequency
}

/// Exponential decay with the given half-life. Future timestamps count as now.
pub fn recency(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let age_hours = (now - created_at).num_milliseconds().max(0) as f64 / 3_600_000.0;
    (-std::f64::consts::LN_2 * age_hours / half_life_hours).exp()
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query terms present in the text.
pub fn keyword_relevance(query: &str, text: &str) -> f64 {
    let q = tokens(query);
    if q.is_empty() {
        return 0.0;
    }
    let t = tokens(text);
    q.intersection(&t).count() as f64 / q.len() as f64
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMemory {
    pub item: MemoryItem,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub source: SourceTier,
}

/// Results plus what degraded while producing them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<RankedMemory>,
    /// The long-term store answered.
    pub store_available: bool,
    /// The query was embedded; when false, relevance is keyword overlap.
    pub query_embedded: bool,
}

struct Candidate {
    item: MemoryItem,
    relevance: f64,
    source: SourceTier,
}

/// Multi-signal ranked retrieval over buffer and long-term store.
pub struct AttentionRetriever {
    config: RetrievalConfig,
    providers: Arc<Providers>,
    store: Arc<dyn LongTermStore>,
    buffers: Arc<BufferRegistry>,
}

impl AttentionRetriever {
    pub fn new(
        config: RetrievalConfig,
        providers: Arc<Providers>,
        store: Arc<dyn LongTermStore>,
        buffers: Arc<BufferRegistry>,
    ) -> Self {
        Self {
            config,
            providers,
            store,
            buffers,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked search. A `limit` of zero means `max_results_per_query`.
    pub async fn search(
        &self,
        query: &str,
        project_id: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<SearchOutcome> {
        validate_project_id(project_id)?;
        if query.trim().is_empty() {
            return Err(Error::validation("query cannot be empty").with_project(project_id));
        }

        let max = self.config.max_results_per_query;
        let limit = if limit == 0 { max } else { limit.min(max) };
        let now = Utc::now();

        let query_embedding = match self.providers.embed(query).await {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(
                    project_id,
                    error = %e,
                    "Query embedding failed, falling back to keyword relevance"
                );
                None
            }
        };

        let buffered = self
            .buffer_candidates(project_id, filters, query, query_embedding.as_deref())
            .await;

        let mut store_available = query_embedding.is_some();
        let mut long_term = Vec::new();
        if let Some(embedding) = &query_embedding {
            let k = self.config.store_k(limit);
            match self.store.query(project_id, embedding, filters, k).await {
                Ok(rows) => {
                    long_term = rows
                        .into_iter()
                        // Partitioning is the store's job; this only guards against a broken adapter.
                        .filter(|r| r.item.project_id() == project_id)
                        .map(|r| Candidate {
                            relevance: f64::from(r.similarity).clamp(0.0, 1.0),
                            item: r.item,
                            source: SourceTier::LongTerm,
                        })
                        .collect();
                }
                Err(e) => {
                    store_available = false;
                    warn!(
                        project_id,
                        store = self.store.name(),
                        error = %e,
                        "Long-term store unavailable, serving buffer-only results"
                    );
                }
            }
        }

        // The long-term copy wins, and raw items already folded into a
        // long-term summary are hidden.
        let buffered: Vec<Candidate> = {
            let covered: HashSet<&str> = long_term
                .iter()
                .flat_map(|c| {
                    std::iter::once(c.item.id.as_str())
                        .chain(c.item.source_ids.iter().map(String::as_str))
                })
                .collect();
            buffered
                .into_iter()
                .filter(|c| !covered.contains(c.item.id.as_str()))
                .collect()
        };

        let threshold = f64::from(self.config.similarity_threshold);
        let embedded = query_embedding.is_some();
        let mut seen = HashSet::new();
        let mut results: Vec<RankedMemory> = long_term
            .into_iter()
            .chain(buffered)
            .filter(|c| {
                if embedded {
                    c.relevance >= threshold
                } else {
                    c.relevance > 0.0
                }
            })
            .filter(|c| seen.insert(c.item.id.clone()))
            .map(|c| self.rank(c, now))
            .collect();

        results.sort_by(compare_ranked);
        results.truncate(limit);

        self.record_access(project_id, &results).await;

        debug!(
            project_id,
            results = results.len(),
            store_available,
            query_embedded = embedded,
            "Search complete"
        );

        Ok(SearchOutcome {
            results,
            store_available,
            query_embedded: embedded,
        })
    }

    /// Score an item when there is no query: relevance counts as zero.
    pub fn rank_unqueried(&self, item: MemoryItem, source: SourceTier) -> RankedMemory {
        self.rank(
            Candidate {
                item,
                relevance: 0.0,
                source,
            },
            Utc::now(),
        )
    }

    fn rank(&self, c: Candidate, now: DateTime<Utc>) -> RankedMemory {
        let breakdown = ScoreBreakdown {
            recency: recency(c.item.created_at, now, self.config.recency_half_life_hours),
            relevance: c.relevance,
            importance: c.item.importance_level().weight(),
            frequency: (1.0 + f64::from(c.item.access_count)).ln(),
        };
        RankedMemory {
            score: blend(&self.config.weights, &breakdown),
            breakdown,
            item: c.item,
            source: c.source,
        }
    }

    /// Buffer items matching the filters, with relevance computed. Missing
    /// embeddings are computed outside the buffer lock and cached back.
    async fn buffer_candidates(
        &self,
        project_id: &str,
        filters: &SearchFilters,
        query: &str,
        query_embedding: Option<&[f32]>,
    ) -> Vec<Candidate> {
        let Some(buffer) = self.buffers.get(project_id).await else {
            return Vec::new();
        };
        let items: Vec<MemoryItem> = buffer
            .lock()
            .await
            .iter()
            .filter(|i| filters.matches(i))
            .cloned()
            .collect();

        let Some(query_embedding) = query_embedding else {
            return items
                .into_iter()
                .map(|item| Candidate {
                    relevance: keyword_relevance(query, item.content()),
                    item,
                    source: SourceTier::Buffer,
                })
                .collect();
        };

        let dimension = self.providers.dimension();
        let missing: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.embedding.as_ref().map(Vec::len) != Some(dimension))
            .map(|(idx, _)| idx)
            .collect();

        let computed = join_all(missing.iter().map(|&idx| self.providers.embed(items[idx].content()))).await;

        let mut items = items;
        let mut fresh = Vec::new();
        for (idx, result) in missing.into_iter().zip(computed) {
            match result {
                Ok(embedding) => {
                    fresh.push((items[idx].id.clone(), embedding.clone()));
                    items[idx].embedding = Some(embedding);
                }
                Err(e) => debug!(item_id = %items[idx].id, error = %e, "Buffer item embedding failed"),
            }
        }
        if !fresh.is_empty() {
            let mut guard = buffer.lock().await;
            for (id, embedding) in fresh {
                guard.set_embedding(&id, embedding);
            }
        }

        items
            .into_iter()
            .map(|item| {
                let relevance = match &item.embedding {
                    Some(e) => f64::from(cosine_similarity(query_embedding, e)).clamp(0.0, 1.0),
                    None => keyword_relevance(query, item.content()),
                };
                Candidate {
                    relevance,
                    item,
                    source: SourceTier::Buffer,
                }
            })
            .collect()
    }

    async fn record_access(&self, project_id: &str, results: &[RankedMemory]) {
        let buffer_ids: HashSet<String> = results
            .iter()
            .filter(|r| r.source == SourceTier::Buffer)
            .map(|r| r.item.id.clone())
            .collect();
        let store_ids: Vec<String> = results
            .iter()
            .filter(|r| r.source == SourceTier::LongTerm)
            .map(|r| r.item.id.clone())
            .collect();

        if !buffer_ids.is_empty() {
            if let Some(buffer) = self.buffers.get(project_id).await {
                buffer.lock().await.touch(&buffer_ids);
            }
        }
        if !store_ids.is_empty() {
            if let Err(e) = self.store.record_access(project_id, &store_ids).await {
                warn!(project_id, error = %e, "Failed to record access on long-term items");
            }
        }
    }
}

/// Score descending, then newest first, then id for a stable order.
fn compare_ranked(a: &RankedMemory, b: &RankedMemory) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.item.created_at.cmp(&a.item.created_at))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::store::InMemoryStore;
    use crate::testing::{FailingEmbedder, JoinSummarizer, KeywordEmbedder, UnavailableStore, scored};
    use crate::types::MemoryMetadata;
    use crate::providers::ProviderLimits;
    use chrono::Duration;

    fn providers(embedder: Arc<dyn crate::EmbeddingProvider>) -> Arc<Providers> {
        Arc::new(Providers::new(embedder, Arc::new(JoinSummarizer), ProviderLimits::default()))
    }

    fn breakdown(importance: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            recency: 0.7,
            relevance: 0.5,
            importance,
            frequency: 1.0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scoring
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_raising_tier_never_lowers_score() {
        let weights = RetrievalWeights::default();
        for pair in ImportanceLevel::ALL.windows(2) {
            let lower = blend(&weights, &breakdown(pair[0].weight()));
            let higher = blend(&weights, &breakdown(pair[1].weight()));
            assert!(higher >= lower, "{} should not score below {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_recency_halves_per_half_life() {
        let now = Utc::now();
        assert!((recency(now, now, 24.0) - 1.0).abs() < 1e-9);
        assert!((recency(now - Duration::hours(24), now, 24.0) - 0.5).abs() < 1e-6);
        assert!((recency(now + Duration::hours(5), now, 24.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_relevance() {
        assert_eq!(keyword_relevance("parser bug", "fixed the parser bug today"), 1.0);
        assert_eq!(keyword_relevance("parser bug", "parser rewrite"), 0.5);
        assert_eq!(keyword_relevance("parser", "nothing related"), 0.0);
        assert_eq!(keyword_relevance("", "anything"), 0.0);
    }

    #[test]
    fn test_filters() {
        let mut meta = MemoryMetadata::new("demo").with_agent("coder").with_tags(["api", "bug"]);
        meta.memory_type = MemoryType::Episodic;
        let item = MemoryItem::new("x", meta, Utc::now());

        assert!(SearchFilters::default().matches(&item));
        assert!(
            SearchFilters {
                agent_id: Some("coder".into()),
                tags: vec!["api".into()],
                memory_types: vec![MemoryType::Episodic, MemoryType::Semantic],
                ..Default::default()
            }
            .matches(&item)
        );
        assert!(
            !SearchFilters {
                tags: vec!["api".into(), "ui".into()],
                ..Default::default()
            }
            .matches(&item)
        );
        assert!(
            !SearchFilters {
                min_importance: Some(ImportanceLevel::Low),
                ..Default::default()
            }
            .matches(&item)
        );
    }

    #[test]
    fn test_store_k_is_capped() {
        let config = RetrievalConfig::default();
        assert_eq!(config.store_k(5), 15);
        assert_eq!(config.store_k(1_000), 100);
        assert_eq!(config.store_k(0), 1);
    }

    #[test]
    fn test_tie_breaks_by_recency() {
        let now = Utc::now();
        let older = MemoryItem::new("a", MemoryMetadata::new("demo"), now - Duration::seconds(10));
        let newer = MemoryItem::new("b", MemoryMetadata::new("demo"), now);
        let mk = |item: MemoryItem| RankedMemory {
            item,
            score: 0.5,
            breakdown: breakdown(0.1),
            source: SourceTier::Buffer,
        };
        let mut ranked = vec![mk(older), mk(newer)];
        ranked.sort_by(compare_ranked);
        assert_eq!(ranked[0].item.content(), "b");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────────

    async fn buffered(registry: &BufferRegistry, items: Vec<MemoryItem>) {
        for item in items {
            let project = item.project_id().to_string();
            registry.get_or_create(&project).await.lock().await.append(item).unwrap();
        }
    }

    fn item(project: &str, content: &str, level: ImportanceLevel) -> MemoryItem {
        scored(MemoryItem::new(content, MemoryMetadata::new(project), Utc::now()), level)
    }

    #[tokio::test]
    async fn test_search_ranks_buffer_items() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        buffered(
            &registry,
            vec![
                item("demo", "deploy pipeline failed on staging", ImportanceLevel::High),
                item("demo", "lunch menu for friday", ImportanceLevel::Low),
            ],
        )
        .await;

        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(KeywordEmbedder::new(256))),
            Arc::new(InMemoryStore::new(256)),
            Arc::clone(&registry),
        );

        let outcome = retriever
            .search("deploy pipeline failed", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert!(outcome.store_available);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].source, SourceTier::Buffer);
        assert!(outcome.results[0].breakdown.relevance >= 0.3);

        // Access was recorded on the buffered copy.
        let snapshot = registry.get("demo").await.unwrap().lock().await.snapshot();
        let hit = snapshot.iter().find(|i| i.content().starts_with("deploy")).unwrap();
        assert_eq!(hit.access_count, 1);
        assert!(hit.embedding.is_some());
    }

    #[tokio::test]
    async fn test_search_never_crosses_projects() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        buffered(&registry, vec![item("other", "secret roadmap", ImportanceLevel::Critical)]).await;

        let store = Arc::new(InMemoryStore::new(256));
        let embedder = KeywordEmbedder::new(256);
        let mut stored = item("other", "secret roadmap archived", ImportanceLevel::Critical);
        stored.embedding = Some(embedder.vector("secret roadmap archived"));
        store.store(&stored).await.unwrap();

        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(embedder)),
            store,
            registry,
        );
        let outcome = retriever
            .search("secret roadmap", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_long_term_copy_wins_over_buffer() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        let embedder = KeywordEmbedder::new(256);
        let raw = item("demo", "database migration plan approved", ImportanceLevel::High);

        let mut summary = item("demo", "database migration plan approved", ImportanceLevel::High);
        summary.id = "ltm_summary".into();
        summary.source_ids = vec![raw.id.clone()];
        summary.embedding = Some(embedder.vector(summary.content()));
        let store = Arc::new(InMemoryStore::new(256));
        store.store(&summary).await.unwrap();
        buffered(&registry, vec![raw]).await;

        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(embedder)),
            store,
            registry,
        );
        let outcome = retriever
            .search("database migration", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].item.id, "ltm_summary");
        assert_eq!(outcome.results[0].source, SourceTier::LongTerm);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_buffer() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        buffered(&registry, vec![item("demo", "release checklist done", ImportanceLevel::Medium)]).await;

        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(KeywordEmbedder::new(256))),
            Arc::new(UnavailableStore),
            registry,
        );
        let outcome = retriever
            .search("release checklist", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert!(!outcome.store_available);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_outage_uses_keywords() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        buffered(
            &registry,
            vec![
                item("demo", "flaky test in auth module", ImportanceLevel::Medium),
                item("demo", "unrelated note", ImportanceLevel::Medium),
            ],
        )
        .await;

        let mut limits = ProviderLimits::default();
        limits.retry.max_attempts = 1;
        let providers = Arc::new(Providers::new(
            Arc::new(FailingEmbedder::new(256)),
            Arc::new(JoinSummarizer),
            limits,
        ));
        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers,
            Arc::new(InMemoryStore::new(256)),
            registry,
        );
        let outcome = retriever
            .search("auth test", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert!(!outcome.query_embedded);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].item.content().contains("auth"));
    }

    #[tokio::test]
    async fn test_higher_tier_ranks_first_when_otherwise_equal() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        let at = Utc::now();
        let low = scored(
            MemoryItem::new("cache eviction bug", MemoryMetadata::new("demo").with_agent("a"), at),
            ImportanceLevel::Low,
        );
        let high = scored(
            MemoryItem::new("cache eviction bug", MemoryMetadata::new("demo").with_agent("b"), at),
            ImportanceLevel::High,
        );
        // Same content and timestamp in one project derive the same id.
        let mut high = high;
        high.id = "mem_high".into();
        buffered(&registry, vec![low, high]).await;

        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(KeywordEmbedder::new(256))),
            Arc::new(InMemoryStore::new(256)),
            registry,
        );
        let outcome = retriever
            .search("cache eviction", "demo", &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].item.id, "mem_high");
        assert!(outcome.results[0].score > outcome.results[1].score);
    }

    #[tokio::test]
    async fn test_rejects_empty_query_and_bad_project() {
        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers(Arc::new(KeywordEmbedder::new(256))),
            Arc::new(InMemoryStore::new(256)),
            Arc::new(BufferRegistry::new(BufferConfig::default())),
        );
        let filters = SearchFilters::default();
        assert!(retriever.search("  ", "demo", &filters, 5).await.is_err());
        assert!(retriever.search("q", "bad/project", &filters, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_results_capped() {
        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        let items = (0..10)
            .map(|n| item("demo", &format!("build log entry {}", n), ImportanceLevel::Medium))
            .collect();
        buffered(&registry, items).await;

        let config = RetrievalConfig {
            max_results_per_query: 3,
            ..Default::default()
        };
        let retriever = AttentionRetriever::new(
            config,
            providers(Arc::new(KeywordEmbedder::new(256))),
            Arc::new(InMemoryStore::new(256)),
            registry,
        );
        let outcome = retriever
            .search("build log entry", "demo", &SearchFilters::default(), 50)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);
    }

    /// Source ids a result stands for: its own id, or the raw items folded into it.
    fn covered_sources(outcome: &SearchOutcome) -> Vec<String> {
        outcome
            .results
            .iter()
            .flat_map(|r| {
                if r.item.source_ids.is_empty() {
                    vec![r.item.id.clone()]
                } else {
                    r.item.source_ids.clone()
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_search_during_consolidation_sees_each_item_once() {
        use crate::consolidation::{ConsolidationConfig, ConsolidationEngine};
        use crate::scoring::ImportanceScorer;
        use crate::testing::GatedStore;
        use chrono::TimeZone;
        use tokio_util::sync::CancellationToken;

        let at = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
        let raw = |content: &str, secs: i64| {
            let meta = MemoryMetadata::new("demo").with_agent("coder");
            scored(
                MemoryItem::new(content, meta, at + Duration::seconds(secs)),
                ImportanceLevel::High,
            )
        };
        let a = raw("deploy pipeline uses blue green rollout", 0);
        let b = raw("deploy pipeline gates on canary metrics", 1);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());

        let registry = Arc::new(BufferRegistry::new(BufferConfig::default()));
        buffered(&registry, vec![a, b]).await;

        let store = Arc::new(GatedStore::new(256));
        let providers = providers(Arc::new(KeywordEmbedder::new(256)));
        let engine = Arc::new(ConsolidationEngine::new(
            ConsolidationConfig::default(),
            Arc::clone(&providers),
            store.clone(),
            Arc::clone(&registry),
            Arc::new(ImportanceScorer::default()),
        ));
        let retriever = AttentionRetriever::new(
            RetrievalConfig::default(),
            providers,
            store.clone(),
            Arc::clone(&registry),
        );

        let cycle = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_cycle("demo", &CancellationToken::new()).await }
        });

        // The summary is in the store, the raw items are still buffered.
        store.written.notified().await;
        assert_eq!(store.inner.count("demo").await.unwrap(), 1);
        assert_eq!(registry.get("demo").await.unwrap().lock().await.len(), 2);

        let during = retriever
            .search("deploy pipeline", "demo", &SearchFilters::default(), 10)
            .await
            .unwrap();
        let sources = covered_sources(&during);
        for id in [&a_id, &b_id] {
            assert_eq!(sources.iter().filter(|s| *s == id).count(), 1, "{} in {:?}", id, sources);
        }
        assert!(during.results.iter().all(|r| r.source == SourceTier::LongTerm));

        store.release.notify_one();
        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.consolidated_items, 2);

        let after = retriever
            .search("deploy pipeline", "demo", &SearchFilters::default(), 10)
            .await
            .unwrap();
        let sources = covered_sources(&after);
        for id in [&a_id, &b_id] {
            assert_eq!(sources.iter().filter(|s| *s == id).count(), 1);
        }
        assert_eq!(after.results.len(), 1);
    }
}
