//! Memory orchestrator
//!
//! The single entry point agents talk to. It owns one engine instance per
//! process: the buffer registry, the provider gate, the long-term store, the
//! consolidation engine and the retriever, all built from one
//! [`MnemoConfig`] value.
//!
//! ```text
//! add_memory ──► score ──► buffer.append ──► pressure? ──► worker.notify
//!                                                    └──► inline cycle (worker disabled)
//! search_memories ──► AttentionRetriever (buffer + long-term)
//! consolidate_now ──► ConsolidationEngine::run_cycle
//! prune / retain / export / import / stats ──► LongTermStore + buffer snapshot
//! ```
//!
//! With `background_worker` enabled, [`MemoryOrchestrator::initialize`]
//! starts the worker. An orchestrator that was never initialized starts it
//! on the first buffer pressure instead.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use mnemo_core::types::{validate_content, validate_project_id};
use mnemo_core::{
    AttentionRetriever, BufferRegistry, ConsolidationEngine, ConsolidationReport,
    EmbeddingProvider, ImportanceLevel, ImportanceScorer, ImportanceSignals, InMemoryStore,
    ItemState, LongTermStore, MemoryItem, MemoryMetadata, Providers, RankedMemory,
    SearchFilters, SearchOutcome, SourceTier, SummarizationProvider,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigValidationError, MnemoConfig, StoreBackend};
use crate::error::{SdkError, SdkResult};
use crate::export::{ExportDump, ExportRecord};
use crate::providers::{ExtractiveSummarizer, embedder_from_config};
use crate::stats::{MemoryStats, StatsRegistry};
use crate::worker::BackgroundWorker;

/// Recent buffer items plus the long-term memories most related to them.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectContext {
    pub project_id: String,
    /// Oldest first.
    pub recent: Vec<MemoryItem>,
    pub relevant: Vec<RankedMemory>,
    pub store_available: bool,
}

/// Prune parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneRequest {
    /// Only items created more than this many seconds ago are considered.
    pub older_than_secs: u64,
    /// Items strictly below this tier are pruned.
    pub min_importance: ImportanceLevel,
    /// Let critical items be pruned on age alone.
    pub override_critical: bool,
    /// Report without deleting.
    pub dry_run: bool,
}

impl Default for PruneRequest {
    fn default() -> Self {
        Self {
            older_than_secs: 30 * 24 * 3600,
            min_importance: ImportanceLevel::Medium,
            override_critical: false,
            dry_run: false,
        }
    }
}

/// What a prune did, or would do in a dry run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub project_id: String,
    pub examined: usize,
    pub pruned: Vec<String>,
    /// Items past the window that were kept, including retained ones.
    pub kept: Vec<String>,
    pub dry_run: bool,
}

/// Result of an import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub project_id: String,
    pub long_term: usize,
    pub buffer: usize,
    pub skipped: usize,
}

/// Memory orchestrator facade
pub struct MemoryOrchestrator {
    config: MnemoConfig,
    scorer: Arc<ImportanceScorer>,
    buffers: Arc<BufferRegistry>,
    providers: Arc<Providers>,
    store: Arc<dyn LongTermStore>,
    engine: Arc<ConsolidationEngine>,
    retriever: AttentionRetriever,
    stats: Arc<StatsRegistry>,
    shutdown: CancellationToken,
    worker: Mutex<Option<BackgroundWorker>>,
    /// Cleared by an explicit stop so pressure does not restart the worker.
    auto_start: AtomicBool,
}

impl MemoryOrchestrator {
    /// Build with the providers and store named in the configuration.
    pub fn new(config: MnemoConfig) -> SdkResult<Self> {
        config.validate()?;
        let embedder = embedder_from_config(&config)?;
        let store = open_store(&config)?;
        Self::with_components(config, embedder, Arc::new(ExtractiveSummarizer::new()), store)
    }

    /// Build with caller-supplied providers and store.
    pub fn with_components(
        config: MnemoConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        summarizer: Arc<dyn SummarizationProvider>,
        store: Arc<dyn LongTermStore>,
    ) -> SdkResult<Self> {
        config.validate()?;
        if embedder.dimension() != store.dimension() {
            return Err(ConfigValidationError::InvalidValue {
                field: "store.embedding_dimension".into(),
                message: format!(
                    "embedder '{}' produces {} dimensions, store '{}' expects {}",
                    embedder.name(),
                    embedder.dimension(),
                    store.name(),
                    store.dimension()
                ),
            }
            .into());
        }

        let scorer = Arc::new(ImportanceScorer::new(config.scoring.clone()));
        let buffers = Arc::new(BufferRegistry::new(config.buffer.clone()));
        let providers = Arc::new(Providers::new(
            embedder,
            summarizer,
            config.providers.limits.clone(),
        ));
        let engine = Arc::new(ConsolidationEngine::new(
            config.consolidation.clone(),
            Arc::clone(&providers),
            Arc::clone(&store),
            Arc::clone(&buffers),
            Arc::clone(&scorer),
        ));
        let retriever = AttentionRetriever::new(
            config.retrieval.clone(),
            Arc::clone(&providers),
            Arc::clone(&store),
            Arc::clone(&buffers),
        );

        info!(
            store = store.name(),
            dimension = store.dimension(),
            capacity = config.buffer.capacity,
            "Memory orchestrator ready"
        );

        Ok(Self {
            scorer,
            buffers,
            providers,
            store,
            engine,
            retriever,
            stats: Arc::new(StatsRegistry::default()),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            auto_start: AtomicBool::new(config.background_worker),
            config,
        })
    }

    /// Build from configuration and start background consolidation when
    /// `background_worker` is set.
    pub async fn open(config: MnemoConfig) -> SdkResult<Self> {
        let orchestrator = Self::new(config)?;
        orchestrator.initialize().await?;
        Ok(orchestrator)
    }

    /// Start background tasks the configuration asks for. Calling it again
    /// is a no-op.
    pub async fn initialize(&self) -> SdkResult<()> {
        if !self.config.background_worker {
            return Ok(());
        }
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(BackgroundWorker::is_running) {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            return Err(SdkError::invalid_operation("orchestrator is shut down"));
        }
        *worker = Some(self.spawn_worker());
        self.auto_start.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn config(&self) -> &MnemoConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Score and buffer a memory. Returns its id.
    ///
    /// Consolidation problems never fail the write: the item stays in the
    /// buffer flagged pending and is retried by a later cycle.
    pub async fn add_memory(
        &self,
        content: &str,
        metadata: MemoryMetadata,
        signals: &ImportanceSignals,
    ) -> SdkResult<String> {
        let project_id = metadata.project_id.clone();
        validate_project_id(&project_id)?;
        validate_content(content, self.config.max_content_bytes)
            .map_err(|e| e.with_project(&project_id))?;
        if metadata.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(mnemo_core::Error::validation("tags cannot be empty")
                .with_project(&project_id)
                .into());
        }

        let mut item = MemoryItem::new(content, metadata, Utc::now());
        let importance = self.scorer.apply(&mut item, signals);
        let id = item.id.clone();

        let outcome = {
            let buffer = self.buffers.get_or_create(&project_id).await;
            let mut guard = buffer.lock().await;
            guard.append(item)?
        };

        debug!(
            project_id = %project_id,
            item_id = %id,
            importance = %importance.level,
            score = importance.score,
            evicted = outcome.evicted.is_some(),
            "Memory added"
        );

        self.stats.record_append(&project_id, &outcome).await;
        if outcome.pressure {
            self.relieve_pressure(&project_id).await;
        }
        Ok(id)
    }

    async fn relieve_pressure(&self, project_id: &str) {
        if self.config.background_worker {
            let mut worker = self.worker.lock().await;
            let running = worker.as_ref().is_some_and(BackgroundWorker::is_running);
            if !running
                && self.auto_start.load(Ordering::SeqCst)
                && !self.shutdown.is_cancelled()
            {
                *worker = Some(self.spawn_worker());
            }
            match worker.as_ref().filter(|w| w.is_running()) {
                Some(worker) => worker.notify(project_id),
                None => debug!(project_id, "Background consolidation stopped, items stay pending"),
            }
            return;
        }

        {
            let worker = self.worker.lock().await;
            if let Some(worker) = worker.as_ref().filter(|w| w.is_running()) {
                worker.notify(project_id);
                return;
            }
        }

        let result = self
            .engine
            .run_cycle(project_id, &self.shutdown.child_token())
            .await;
        if let Err(e) = &result {
            warn!(project_id, error = %e, "Inline consolidation failed, items stay buffered");
        }
        self.stats.record_cycle(project_id, &result).await;
    }

    /// Run a consolidation cycle now.
    pub async fn consolidate_now(&self, project_id: &str) -> SdkResult<ConsolidationReport> {
        validate_project_id(project_id)?;
        let result = self
            .engine
            .run_cycle(project_id, &self.shutdown.child_token())
            .await;
        self.stats.record_cycle(project_id, &result).await;
        Ok(result?)
    }

    /// Delete long-term items older than the window and below the floor.
    ///
    /// Critical items survive unless `override_critical` is set. `Retained`
    /// items are never pruned. Survivors keep their state.
    pub async fn prune(&self, project_id: &str, request: &PruneRequest) -> SdkResult<PruneReport> {
        validate_project_id(project_id)?;
        let secs = i64::try_from(request.older_than_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let window = chrono::Duration::seconds(secs);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let items = self.store.list(project_id).await?;
        let mut report = PruneReport {
            project_id: project_id.to_string(),
            examined: items.len(),
            dry_run: request.dry_run,
            ..Default::default()
        };

        for mut item in items {
            if item.created_at >= cutoff {
                continue;
            }

            let eligible = if item.state() == ItemState::Retained {
                false
            } else if item.is_critical() {
                request.override_critical
            } else {
                item.importance_level() < request.min_importance
            };

            if eligible {
                debug!(
                    project_id,
                    item_id = %item.id,
                    importance = %item.importance_level(),
                    dry_run = request.dry_run,
                    "Pruning long-term item"
                );
                if !request.dry_run {
                    item.transition(ItemState::Pruned)?;
                    self.store.delete(project_id, &item.id).await?;
                }
                report.pruned.push(item.id);
            } else {
                report.kept.push(item.id);
            }
        }

        if !request.dry_run {
            self.stats.record_prune(project_id, report.pruned.len()).await;
        }
        info!(
            project_id,
            examined = report.examined,
            pruned = report.pruned.len(),
            kept = report.kept.len(),
            dry_run = request.dry_run,
            override_critical = request.override_critical,
            "Prune complete"
        );
        Ok(report)
    }

    /// Pin a long-term item so no prune removes it. `Retained` is terminal.
    pub async fn retain(&self, project_id: &str, item_id: &str) -> SdkResult<MemoryItem> {
        validate_project_id(project_id)?;
        let mut item = self.store.get(project_id, item_id).await?.ok_or_else(|| {
            mnemo_core::Error::validation("no long-term memory with this id")
                .with_project(project_id)
                .with_item(item_id)
        })?;

        if item.state() != ItemState::Retained {
            item.transition(ItemState::Retained)?;
            self.store.store(&item).await?;
            info!(project_id, item_id, "Memory retained");
        }
        Ok(item)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Ranked search across the buffer and the long-term store.
    pub async fn search_memories(
        &self,
        project_id: &str,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> SdkResult<SearchOutcome> {
        Ok(self.retriever.search(query, project_id, filters, limit).await?)
    }

    /// Context for an agent joining a project.
    pub async fn get_project_context(&self, project_id: &str) -> SdkResult<ProjectContext> {
        validate_project_id(project_id)?;
        let ctx = &self.config.context;

        let recent = match self.buffers.get(project_id).await {
            Some(buffer) => buffer.lock().await.window(ctx.recent_items),
            None => Vec::new(),
        };

        let mut context = ProjectContext {
            project_id: project_id.to_string(),
            recent,
            relevant: Vec::new(),
            store_available: true,
        };
        if ctx.relevant_items == 0 {
            return Ok(context);
        }

        if context.recent.is_empty() {
            let (relevant, available) = self.most_important(project_id, ctx.relevant_items).await;
            context.relevant = relevant;
            context.store_available = available;
            return Ok(context);
        }

        let query = recent_query(&context.recent, ctx.query_chars);
        let outcome = self
            .retriever
            .search(
                &query,
                project_id,
                &SearchFilters::default(),
                ctx.relevant_items + context.recent.len(),
            )
            .await?;
        let recent_ids: HashSet<&str> = context.recent.iter().map(|i| i.id.as_str()).collect();
        context.relevant = outcome
            .results
            .into_iter()
            .filter(|r| !recent_ids.contains(r.item.id.as_str()))
            .take(ctx.relevant_items)
            .collect();
        context.store_available = outcome.store_available;
        Ok(context)
    }

    async fn most_important(&self, project_id: &str, n: usize) -> (Vec<RankedMemory>, bool) {
        let mut items = match self.store.list(project_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(project_id, error = %e, "Long-term store unavailable for context");
                return (Vec::new(), false);
            }
        };
        items.sort_by(|a, b| {
            b.importance_level()
                .cmp(&a.importance_level())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let ranked = items
            .into_iter()
            .take(n)
            .map(|item| self.retriever.rank_unqueried(item, SourceTier::LongTerm))
            .collect();
        (ranked, true)
    }

    /// Buffer and long-term counts plus lifetime counters.
    pub async fn stats(&self, project_id: &str) -> SdkResult<MemoryStats> {
        validate_project_id(project_id)?;
        let (buffer_len, overflow_len, pending) = match self.buffers.get(project_id).await {
            Some(buffer) => {
                let guard = buffer.lock().await;
                (guard.len(), guard.overflow_len(), guard.pending_count())
            }
            None => (0, 0, 0),
        };
        let long_term = match self.store.count(project_id).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(project_id, error = %e, "Long-term count unavailable");
                None
            }
        };
        Ok(MemoryStats {
            project_id: project_id.to_string(),
            buffer_len,
            overflow_len,
            pending,
            long_term,
            counters: self.stats.snapshot(project_id).await,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export / import
    // ─────────────────────────────────────────────────────────────────────────

    /// Dump every live item of a project.
    pub async fn export(&self, project_id: &str) -> SdkResult<ExportDump> {
        validate_project_id(project_id)?;
        let long_term = self.store.list(project_id).await?;
        let buffered = match self.buffers.get(project_id).await {
            Some(buffer) => buffer.lock().await.snapshot(),
            None => Vec::new(),
        };

        let stored: HashSet<&str> = long_term.iter().map(|i| i.id.as_str()).collect();
        let mut records: Vec<ExportRecord> = long_term
            .iter()
            .map(|i| ExportRecord::from_item(i, SourceTier::LongTerm, self.store.name()))
            .collect();
        records.extend(
            buffered
                .iter()
                .filter(|i| !stored.contains(i.id.as_str()))
                .map(|i| ExportRecord::from_item(i, SourceTier::Buffer, self.store.name())),
        );

        info!(project_id, items = records.len(), "Exported project");
        Ok(ExportDump::new(project_id, records))
    }

    /// Load a dump. Long-term records are re-embedded and upserted, buffer
    /// records re-appended. Importing the same dump twice changes nothing.
    pub async fn import(&self, dump: &ExportDump) -> SdkResult<ImportReport> {
        dump.check_version()?;
        let project_id = dump.project_id.as_str();
        validate_project_id(project_id)?;
        for record in &dump.items {
            validate_content(&record.content, self.config.max_content_bytes)
                .map_err(|e| e.with_project(project_id).with_item(&record.id))?;
        }

        let mut report = ImportReport {
            project_id: project_id.to_string(),
            ..Default::default()
        };
        let mut pressure = false;

        for record in &dump.items {
            if record.state == ItemState::Pruned {
                report.skipped += 1;
                continue;
            }
            let mut item = record.to_item(project_id);
            match record.tier {
                SourceTier::LongTerm => {
                    let embedding = self
                        .providers
                        .embed(item.content())
                        .await
                        .map_err(|e| e.with_project(project_id).with_item(&item.id))?;
                    item.embedding = Some(embedding);
                    self.store.store(&item).await?;
                    report.long_term += 1;
                }
                SourceTier::Buffer => {
                    let outcome = {
                        let buffer = self.buffers.get_or_create(project_id).await;
                        let mut guard = buffer.lock().await;
                        guard.append(item)?
                    };
                    self.stats.record_append(project_id, &outcome).await;
                    if outcome.duplicate {
                        report.skipped += 1;
                    } else {
                        report.buffer += 1;
                    }
                    pressure |= outcome.pressure;
                }
            }
        }

        info!(
            project_id,
            long_term = report.long_term,
            buffer = report.buffer,
            skipped = report.skipped,
            "Imported project"
        );
        if pressure {
            self.relieve_pressure(project_id).await;
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background worker
    // ─────────────────────────────────────────────────────────────────────────

    /// Start periodic and pressure-driven consolidation.
    pub async fn start_background_consolidation(&self) -> SdkResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(BackgroundWorker::is_running) {
            return Err(SdkError::invalid_operation(
                "background consolidation already running",
            ));
        }
        if self.shutdown.is_cancelled() {
            return Err(SdkError::invalid_operation("orchestrator is shut down"));
        }
        *worker = Some(self.spawn_worker());
        self.auto_start.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_worker(&self) -> BackgroundWorker {
        BackgroundWorker::spawn(
            Arc::clone(&self.engine),
            Arc::clone(&self.buffers),
            Arc::clone(&self.stats),
            Duration::from_secs(self.config.consolidation.background_interval_secs),
            &self.shutdown,
        )
    }

    /// Stop the worker, waiting for it to finish. In-flight cycles are
    /// cancelled and their unfinished items stay pending until a later
    /// `consolidate_now` or worker start.
    pub async fn stop_background_consolidation(&self) {
        self.auto_start.store(false, Ordering::SeqCst);
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }

    pub async fn is_worker_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }

    /// Stop the worker and cancel any cycle still running.
    pub async fn shutdown(&self) {
        self.stop_background_consolidation().await;
        self.shutdown.cancel();
        info!("Memory orchestrator shut down");
    }
}

fn open_store(config: &MnemoConfig) -> SdkResult<Arc<dyn LongTermStore>> {
    let dimension = config.store.embedding_dimension;
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new(dimension))),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => {
            let path = config
                .store
                .path
                .as_ref()
                .ok_or(ConfigValidationError::MissingStorePath)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(mnemo_core::SqliteStore::open(path, dimension)?))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(SdkError::invalid_operation(
            "sqlite store requires the `sqlite` feature",
        )),
    }
}

/// Newest recent content first, cut to `max_chars`.
fn recent_query(recent: &[MemoryItem], max_chars: usize) -> String {
    let mut query = String::new();
    for item in recent.iter().rev() {
        if !query.is_empty() {
            query.push('\n');
        }
        query.push_str(item.content());
        if query.chars().count() >= max_chars {
            break;
        }
    }
    query.chars().take(max_chars.max(1)).collect()
}
