//! Consolidation of short-term items into long-term storage.
//!
//! ## Cycle
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         ConsolidationEngine                          │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────┐  │
//! │  │  Snapshot  │─▶│   Group    │─▶│  Summarize   │─▶│    Write     │  │
//! │  │ (locked)   │  │ agent×time │  │  + embed     │  │  (upsert)    │  │
//! │  └────────────┘  └────────────┘  └──────────────┘  └──────────────┘  │
//! │                                                            │         │
//! │                                   remove written / flag the rest     │
//! │                                          pending (locked)            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The buffer lock is held only while taking the snapshot and while applying
//! the result. Provider calls and store writes happen without it.
//!
//! Candidates are grouped by `(agent, floor(created_at / window))` and split
//! into chunks of at most `max_group_size`. A group with several sources is
//! written under an id derived from its sorted source ids, so consolidating
//! the same set twice upserts the same row. A lone item that fits the summary
//! budget is stored verbatim under its own id.
//!
//! Critical items are copied into the summary verbatim. Only the remaining
//! texts go through the summarization provider.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::BufferRegistry;
use crate::error::{Error, Result};
use crate::providers::{LongTermStore, Providers};
use crate::scoring::ImportanceScorer;
use crate::types::{
    CONSOLIDATED_TAG, ImportanceLevel, ItemState, MemoryItem, MemoryMetadata, derive_group_id,
    validate_project_id,
};

/// Consolidation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Width of the time buckets used for grouping.
    pub group_window_secs: u64,
    pub max_group_size: usize,
    /// Hard limit on summarization output, in characters.
    pub summary_max_len: usize,
    /// A cycle running longer than this is cancelled and requeued.
    pub cycle_timeout_ms: u64,
    /// Period of the background worker.
    pub background_interval_secs: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            group_window_secs: 300,
            max_group_size: 8,
            summary_max_len: 1200,
            cycle_timeout_ms: 120_000,
            background_interval_secs: 300,
        }
    }
}

impl ConsolidationConfig {
    pub fn validate(&self) -> std::result::Result<(), (&'static str, String)> {
        if self.group_window_secs == 0 {
            return Err(("consolidation.group_window_secs", "must be greater than 0".into()));
        }
        if self.max_group_size == 0 {
            return Err(("consolidation.max_group_size", "must be greater than 0".into()));
        }
        if self.summary_max_len < 16 {
            return Err(("consolidation.summary_max_len", "must be at least 16".into()));
        }
        if self.cycle_timeout_ms == 0 {
            return Err(("consolidation.cycle_timeout_ms", "must be greater than 0".into()));
        }
        if self.background_interval_secs == 0 {
            return Err((
                "consolidation.background_interval_secs",
                "must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Candidates sharing an agent and a time bucket.
#[derive(Debug, Clone)]
pub struct CandidateGroup {
    pub project_id: String,
    pub agent_id: Option<String>,
    pub bucket: i64,
    /// Oldest first.
    pub items: Vec<MemoryItem>,
}

impl CandidateGroup {
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.iter().map(|i| i.id.clone()).collect();
        ids.sort();
        ids
    }
}

/// Group candidates by `(agent, time bucket)`, splitting groups larger than
/// `max_group_size`. Output order is deterministic.
pub fn group_candidates(
    project_id: &str,
    candidates: Vec<MemoryItem>,
    window_secs: u64,
    max_group_size: usize,
) -> Vec<CandidateGroup> {
    let window = window_secs.max(1) as i64;
    let mut buckets: BTreeMap<(i64, Option<String>), Vec<MemoryItem>> = BTreeMap::new();
    let mut seen = HashSet::new();

    for item in candidates {
        if !seen.insert(item.id.clone()) {
            continue;
        }
        let bucket = item.created_at.timestamp().div_euclid(window);
        buckets
            .entry((bucket, item.metadata.agent_id.clone()))
            .or_default()
            .push(item);
    }

    let mut groups = Vec::new();
    for ((bucket, agent_id), mut items) in buckets {
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for chunk in items.chunks(max_group_size.max(1)) {
            groups.push(CandidateGroup {
                project_id: project_id.to_string(),
                agent_id: agent_id.clone(),
                bucket,
                items: chunk.to_vec(),
            });
        }
    }
    groups
}

/// Result of a consolidation cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub cycle_id: String,
    pub project_id: String,
    /// Items selected for consolidation.
    pub candidates: usize,
    pub groups: usize,
    /// Groups written to the long-term store.
    pub written_groups: usize,
    /// Ids of the long-term items written.
    pub stored_ids: Vec<String>,
    /// Buffer items removed after their group was written.
    pub consolidated_items: usize,
    /// Buffer items flagged pending after a failure.
    pub pending_items: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.written_groups == self.groups
    }
}

#[derive(Default)]
struct CycleProgress {
    written_sources: HashSet<String>,
    stored_ids: Vec<String>,
    written_groups: usize,
    errors: Vec<String>,
}

/// Summarize-and-migrate pipeline.
pub struct ConsolidationEngine {
    config: ConsolidationConfig,
    threshold: ImportanceLevel,
    providers: Arc<Providers>,
    store: Arc<dyn LongTermStore>,
    buffers: Arc<BufferRegistry>,
    scorer: Arc<ImportanceScorer>,
    cycle_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConsolidationEngine {
    pub fn new(
        config: ConsolidationConfig,
        providers: Arc<Providers>,
        store: Arc<dyn LongTermStore>,
        buffers: Arc<BufferRegistry>,
        scorer: Arc<ImportanceScorer>,
    ) -> Self {
        let threshold = buffers.config().consolidation_threshold;
        Self {
            config,
            threshold,
            providers,
            store,
            buffers,
            scorer,
            cycle_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Run one cycle for a project.
    ///
    /// Groups that could not be written leave their items in the buffer
    /// flagged `PendingConsolidation`. If the cycle is cancelled or times out,
    /// groups already written stay written, the rest are flagged, and a
    /// `Cancelled` error is returned.
    pub async fn run_cycle(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationReport> {
        validate_project_id(project_id)?;
        let started = Instant::now();
        let cycle_id = Uuid::new_v4().to_string();

        let cycle_lock = {
            let mut locks = self.cycle_locks.lock().await;
            Arc::clone(locks.entry(project_id.to_string()).or_default())
        };
        let _cycle = cycle_lock.lock().await;

        let mut report = ConsolidationReport {
            cycle_id: cycle_id.clone(),
            project_id: project_id.to_string(),
            ..Default::default()
        };

        let Some(buffer) = self.buffers.get(project_id).await else {
            return Ok(report);
        };

        let candidates = buffer.lock().await.pending_for_consolidation(self.threshold);
        if candidates.is_empty() {
            debug!(project_id, cycle_id = %cycle_id, "No consolidation candidates");
            return Ok(report);
        }

        let candidate_ids: HashSet<String> = candidates.iter().map(|i| i.id.clone()).collect();
        let groups = group_candidates(
            project_id,
            candidates,
            self.config.group_window_secs,
            self.config.max_group_size,
        );
        report.candidates = candidate_ids.len();
        report.groups = groups.len();

        info!(
            project_id,
            cycle_id = %cycle_id,
            candidates = report.candidates,
            groups = report.groups,
            "Starting consolidation cycle"
        );

        let mut progress = CycleProgress::default();
        let timeout = Duration::from_millis(self.config.cycle_timeout_ms);
        let interrupted = {
            let work = self.process_groups(&groups, &mut progress);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some("cancelled"),
                res = tokio::time::timeout(timeout, work) => match res {
                    Ok(()) => None,
                    Err(_) => Some("timed out"),
                },
            }
        };

        let unfinished: HashSet<String> = candidate_ids
            .difference(&progress.written_sources)
            .cloned()
            .collect();
        {
            let mut guard = buffer.lock().await;
            report.consolidated_items = guard.remove_ids(&progress.written_sources);
            report.pending_items = guard.mark_pending(&unfinished);
        }

        report.written_groups = progress.written_groups;
        report.stored_ids = progress.stored_ids;
        report.errors = progress.errors;
        report.duration_ms = started.elapsed().as_millis() as u64;

        if let Some(reason) = interrupted {
            warn!(
                project_id,
                cycle_id = %cycle_id,
                written_groups = report.written_groups,
                pending = report.pending_items,
                reason,
                "Consolidation cycle interrupted, remaining items requeued"
            );
            return Err(Error::cancelled(format!("consolidation cycle {}", reason))
                .with_project(project_id));
        }

        if report.is_complete() {
            info!(
                project_id,
                cycle_id = %cycle_id,
                written_groups = report.written_groups,
                consolidated = report.consolidated_items,
                duration_ms = report.duration_ms,
                "Consolidation cycle complete"
            );
        } else {
            warn!(
                project_id,
                cycle_id = %cycle_id,
                written_groups = report.written_groups,
                groups = report.groups,
                pending = report.pending_items,
                "Consolidation incomplete, items flagged pending"
            );
        }

        Ok(report)
    }

    /// Build every group, then write them one by one. A group is only
    /// counted once its single upsert has returned.
    async fn process_groups(&self, groups: &[CandidateGroup], progress: &mut CycleProgress) {
        let built = join_all(groups.iter().map(|g| self.build_item(g))).await;

        for (group, result) in groups.iter().zip(built) {
            let outcome = match result {
                Ok(item) => self.store.store(&item).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(id) => {
                    debug!(
                        project_id = %group.project_id,
                        item_id = %id,
                        sources = group.items.len(),
                        "Group written to long-term store"
                    );
                    progress.written_groups += 1;
                    progress.stored_ids.push(id);
                    progress
                        .written_sources
                        .extend(group.items.iter().map(|i| i.id.clone()));
                }
                Err(e) => {
                    warn!(
                        project_id = %group.project_id,
                        sources = group.items.len(),
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to consolidate group"
                    );
                    progress.errors.push(e.to_string());
                }
            }
        }
    }

    /// Summarize and embed a group into the item to be stored.
    pub async fn build_item(&self, group: &CandidateGroup) -> Result<MemoryItem> {
        let max_len = self.config.summary_max_len;
        let verbatim = match group.items.as_slice() {
            [only] => only.is_critical() || only.content().chars().count() <= max_len,
            _ => false,
        };

        let content = if verbatim {
            group.items[0].content().to_string()
        } else {
            self.summarize_group(group, max_len).await?
        };

        let created_at = group
            .items
            .iter()
            .map(|i| i.created_at)
            .max()
            .ok_or_else(|| Error::Other("empty consolidation group".into()))?;

        let mut item = MemoryItem::new(content, self.group_metadata(group), created_at);
        item.id = if verbatim {
            group.items[0].id.clone()
        } else {
            derive_group_id(&group.project_id, group.agent_id.as_deref(), &group.source_ids())
        };
        item.source_ids = group.source_ids();
        item.access_count = group
            .items
            .iter()
            .fold(0u32, |acc, i| acc.saturating_add(i.access_count));
        self.scorer.inherit(&mut item, &group.items);

        let cached = group.items[0]
            .embedding
            .as_ref()
            .filter(|e| verbatim && e.len() == self.providers.dimension());
        let embedding = match cached {
            Some(e) => e.clone(),
            None => self
                .providers
                .embed(item.content())
                .await
                .map_err(|e| e.with_project(&group.project_id).with_item(&item.id))?,
        };
        item.embedding = Some(embedding);
        item.transition(ItemState::Consolidated)?;
        Ok(item)
    }

    async fn summarize_group(&self, group: &CandidateGroup, max_len: usize) -> Result<String> {
        let (critical, rest): (Vec<&MemoryItem>, Vec<&MemoryItem>) =
            group.items.iter().partition(|i| i.is_critical());

        let mut parts: Vec<String> = critical.iter().map(|i| i.content().to_string()).collect();
        let used: usize = parts.iter().map(|p| p.chars().count() + 1).sum();

        if !rest.is_empty() {
            let budget = max_len.saturating_sub(used);
            if budget == 0 {
                warn!(
                    project_id = %group.project_id,
                    critical = critical.len(),
                    dropped = rest.len(),
                    "Critical content fills the summary, non-critical items not summarized"
                );
            } else {
                let texts: Vec<String> = rest.iter().map(|i| i.content().to_string()).collect();
                let summary = self
                    .providers
                    .summarize(&texts, budget)
                    .await
                    .map_err(|e| e.with_project(&group.project_id))?;
                if !summary.trim().is_empty() {
                    parts.push(summary);
                }
            }
        }

        if parts.is_empty() {
            return Err(Error::provider("summarizer", "empty summary")
                .with_project(&group.project_id));
        }
        Ok(parts.join("\n"))
    }

    fn group_metadata(&self, group: &CandidateGroup) -> MemoryMetadata {
        let mut tags: Vec<String> = group
            .items
            .iter()
            .flat_map(|i| i.metadata.tags.iter().cloned())
            .chain(std::iter::once(CONSOLIDATED_TAG.to_string()))
            .collect();
        tags.sort();
        tags.dedup();

        // Type of the most important source; the earliest wins ties.
        let memory_type = group
            .items
            .iter()
            .fold(None::<&MemoryItem>, |best, i| match best {
                Some(b) if b.importance_level() >= i.importance_level() => Some(b),
                _ => Some(i),
            })
            .map(|i| i.metadata.memory_type)
            .unwrap_or_default();

        MemoryMetadata {
            project_id: group.project_id.clone(),
            agent_id: group.agent_id.clone(),
            tags,
            memory_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::providers::{ProviderLimits, RetryPolicy, SummarizationProvider};
    use crate::store::InMemoryStore;
    use crate::testing::{JoinSummarizer, KeywordEmbedder, UnavailableStore, scored};
    use crate::types::MemoryType;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::atomic::Ordering;

    const DIM: usize = 256;

    fn base() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100, 0).unwrap()
    }

    fn item(agent: &str, secs: i64, content: &str, level: ImportanceLevel) -> MemoryItem {
        let meta = MemoryMetadata::new("demo").with_agent(agent);
        scored(
            MemoryItem::new(content, meta, base() + ChronoDuration::seconds(secs)),
            level,
        )
    }

    fn limits() -> ProviderLimits {
        ProviderLimits {
            max_concurrent_calls: 4,
            call_timeout_ms: 1_000,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }

    struct Fixture {
        engine: ConsolidationEngine,
        buffers: Arc<BufferRegistry>,
        store: Arc<dyn LongTermStore>,
        embedder: Arc<KeywordEmbedder>,
    }

    fn fixture_with(
        buffer: BufferConfig,
        store: Arc<dyn LongTermStore>,
        summarizer: Arc<dyn SummarizationProvider>,
    ) -> Fixture {
        let embedder = Arc::new(KeywordEmbedder::new(DIM));
        let providers = Arc::new(Providers::new(embedder.clone(), summarizer, limits()));
        let buffers = Arc::new(BufferRegistry::new(buffer));
        let engine = ConsolidationEngine::new(
            ConsolidationConfig::default(),
            providers,
            Arc::clone(&store),
            Arc::clone(&buffers),
            Arc::new(ImportanceScorer::default()),
        );
        Fixture {
            engine,
            buffers,
            store,
            embedder,
        }
    }

    fn fixture(capacity: usize) -> Fixture {
        fixture_with(
            BufferConfig::default().with_capacity(capacity),
            Arc::new(InMemoryStore::new(DIM)),
            Arc::new(JoinSummarizer),
        )
    }

    async fn append(f: &Fixture, items: Vec<MemoryItem>) {
        let buffer = f.buffers.get_or_create("demo").await;
        let mut guard = buffer.lock().await;
        for item in items {
            guard.append(item).unwrap();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grouping
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_groups_by_agent_and_window() {
        let items = vec![
            item("coder", 0, "a", ImportanceLevel::High),
            item("coder", 10, "b", ImportanceLevel::High),
            item("reviewer", 20, "c", ImportanceLevel::High),
            item("coder", 400, "d", ImportanceLevel::High),
        ];
        let groups = group_candidates("demo", items, 300, 8);
        assert_eq!(groups.len(), 3);

        let sizes: Vec<(Option<&str>, usize)> = groups
            .iter()
            .map(|g| (g.agent_id.as_deref(), g.items.len()))
            .collect();
        assert!(sizes.contains(&(Some("coder"), 2)));
        assert!(sizes.contains(&(Some("reviewer"), 1)));
        assert!(sizes.contains(&(Some("coder"), 1)));
    }

    #[test]
    fn test_groups_split_at_max_size() {
        let items = (0..5)
            .map(|n| item("coder", n, &format!("step {}", n), ImportanceLevel::High))
            .collect();
        let groups = group_candidates("demo", items, 300, 2);
        let sizes: Vec<usize> = groups.iter().map(|g| g.items.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(groups[0].items[0].content(), "step 0");
    }

    #[test]
    fn test_grouping_is_deterministic_and_dedups() {
        let a = item("coder", 0, "a", ImportanceLevel::High);
        let b = item("coder", 5, "b", ImportanceLevel::High);
        let first = group_candidates("demo", vec![a.clone(), b.clone(), a.clone()], 300, 8);
        let second = group_candidates("demo", vec![b, a], 300, 8);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source_ids(), second[0].source_ids());
        assert_eq!(first[0].items.len(), 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_critical_content_kept_verbatim() {
        let f = fixture(10);
        let mut critical = item("coder", 0, "NEVER drop the users table", ImportanceLevel::Critical);
        critical.metadata.tags = vec!["critical".into()];
        let group = CandidateGroup {
            project_id: "demo".into(),
            agent_id: Some("coder".into()),
            bucket: 0,
            items: vec![
                critical,
                item("coder", 1, "ran the migration dry run", ImportanceLevel::High),
                item("coder", 2, "fixed lint warnings", ImportanceLevel::Low),
            ],
        };

        let built = f.engine.build_item(&group).await.unwrap();
        assert!(built.content().contains("NEVER drop the users table"));
        assert!(built.is_critical());
        assert_eq!(built.state(), ItemState::Consolidated);
        assert_eq!(built.source_ids.len(), 3);
        assert!(built.metadata.has_tag("consolidated"));
        assert!(built.metadata.has_tag("critical"));
        assert_eq!(built.embedding.as_ref().map(Vec::len), Some(DIM));
        assert!(built.id.starts_with("ltm_"));
    }

    #[tokio::test]
    async fn test_summary_respects_max_length() {
        let f = fixture(10);
        let items = (0..4)
            .map(|n| item("coder", n, &"word ".repeat(200), ImportanceLevel::High))
            .collect::<Vec<_>>();
        // Distinct content so ids differ.
        let items: Vec<MemoryItem> = items
            .into_iter()
            .enumerate()
            .map(|(n, i)| {
                scored(
                    i.new_version(format!("{}{}", i.content(), n), i.created_at),
                    ImportanceLevel::High,
                )
            })
            .collect();
        let group = CandidateGroup {
            project_id: "demo".into(),
            agent_id: Some("coder".into()),
            bucket: 0,
            items,
        };
        let built = f.engine.build_item(&group).await.unwrap();
        assert!(built.content().chars().count() <= f.engine.config().summary_max_len);
    }

    #[tokio::test]
    async fn test_single_item_keeps_its_id() {
        let f = fixture(10);
        let raw = item("coder", 0, "chose postgres for storage", ImportanceLevel::High);
        let group = CandidateGroup {
            project_id: "demo".into(),
            agent_id: Some("coder".into()),
            bucket: 0,
            items: vec![raw.clone()],
        };
        let built = f.engine.build_item(&group).await.unwrap();
        assert_eq!(built.id, raw.id);
        assert_eq!(built.content(), raw.content());
        assert_eq!(built.importance_level(), ImportanceLevel::High);
    }

    #[tokio::test]
    async fn test_memory_type_follows_most_important_source() {
        let f = fixture(10);
        let mut low = item("coder", 0, "tidy", ImportanceLevel::Low);
        low.metadata.memory_type = MemoryType::Episodic;
        let mut high = item("coder", 1, "how to release", ImportanceLevel::High);
        high.metadata.memory_type = MemoryType::Procedural;
        let group = CandidateGroup {
            project_id: "demo".into(),
            agent_id: Some("coder".into()),
            bucket: 0,
            items: vec![low, high],
        };
        let built = f.engine.build_item(&group).await.unwrap();
        assert_eq!(built.metadata.memory_type, MemoryType::Procedural);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cycles
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cycle_moves_candidates_and_keeps_rest() {
        let f = fixture(10);
        append(
            &f,
            vec![
                item("coder", 0, "decided on event sourcing", ImportanceLevel::High),
                item("coder", 1, "typo fix", ImportanceLevel::Low),
            ],
        )
        .await;

        let report = f.engine.run_cycle("demo", &CancellationToken::new()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.candidates, 1);
        assert_eq!(report.consolidated_items, 1);
        assert_eq!(f.store.count("demo").await.unwrap(), 1);

        let buffer = f.buffers.get("demo").await.unwrap();
        let left = buffer.lock().await.snapshot();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content(), "typo fix");
    }

    #[tokio::test]
    async fn test_consolidating_twice_creates_no_duplicates() {
        let f = fixture(10);
        let items = vec![
            item("coder", 0, "api contract agreed", ImportanceLevel::High),
            item("coder", 5, "api versioning scheme chosen", ImportanceLevel::High),
        ];
        append(&f, items.clone()).await;

        let cancel = CancellationToken::new();
        let first = f.engine.run_cycle("demo", &cancel).await.unwrap();
        let second = f.engine.run_cycle("demo", &cancel).await.unwrap();
        assert_eq!(first.written_groups, 1);
        assert_eq!(second.candidates, 0);
        assert_eq!(f.store.count("demo").await.unwrap(), 1);

        // Replaying the same candidate set upserts the same row.
        append(&f, items).await;
        let third = f.engine.run_cycle("demo", &cancel).await.unwrap();
        assert_eq!(third.stored_ids, first.stored_ids);
        assert_eq!(f.store.count("demo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evicted_item_is_consolidated() {
        let f = fixture(2);
        append(
            &f,
            vec![
                item("coder", 0, "old low note", ImportanceLevel::Low),
                item("coder", 1, "b", ImportanceLevel::Low),
                item("coder", 2, "c", ImportanceLevel::Low),
            ],
        )
        .await;

        let report = f.engine.run_cycle("demo", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(f.store.count("demo").await.unwrap(), 1);
        let buffer = f.buffers.get("demo").await.unwrap();
        assert_eq!(buffer.lock().await.overflow_len(), 0);
        assert_eq!(buffer.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_flags_pending_and_retries_later() {
        let f = fixture(10);
        append(&f, vec![item("coder", 0, "critical schema decision", ImportanceLevel::Critical)]).await;

        f.embedder.fail.store(true, Ordering::SeqCst);
        let report = f.engine.run_cycle("demo", &CancellationToken::new()).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.pending_items, 1);
        assert_eq!(f.store.count("demo").await.unwrap(), 0);
        // Bounded retries: two attempts for the one embed call.
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 2);

        let buffer = f.buffers.get("demo").await.unwrap();
        let pending = buffer.lock().await.snapshot();
        assert_eq!(pending[0].state(), ItemState::PendingConsolidation);
        assert_eq!(pending[0].consolidation_attempts, 1);

        f.embedder.fail.store(false, Ordering::SeqCst);
        let report = f.engine.run_cycle("demo", &CancellationToken::new()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(f.store.count("demo").await.unwrap(), 1);
        assert!(buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_keeps_items() {
        let f = fixture_with(
            BufferConfig::default(),
            Arc::new(UnavailableStore),
            Arc::new(JoinSummarizer),
        );
        append(&f, vec![item("coder", 0, "keep me", ImportanceLevel::High)]).await;

        let report = f.engine.run_cycle("demo", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.written_groups, 0);
        assert_eq!(report.errors.len(), 1);
        let buffer = f.buffers.get("demo").await.unwrap();
        assert_eq!(buffer.lock().await.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_writes_nothing() {
        struct Stalled;

        #[async_trait]
        impl SummarizationProvider for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }
            async fn summarize(&self, _texts: &[String], _max_len: usize) -> Result<String> {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }

        let f = fixture_with(
            BufferConfig::default(),
            Arc::new(InMemoryStore::new(DIM)),
            Arc::new(Stalled),
        );
        append(
            &f,
            vec![
                item("coder", 0, "first", ImportanceLevel::High),
                item("coder", 1, "second", ImportanceLevel::High),
            ],
        )
        .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = f.engine.run_cycle("demo", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(f.store.count("demo").await.unwrap(), 0);

        let buffer = f.buffers.get("demo").await.unwrap();
        assert_eq!(buffer.lock().await.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_project_is_noop() {
        let f = fixture(10);
        let report = f.engine.run_cycle("nobody", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert!(report.is_complete());
    }
}
