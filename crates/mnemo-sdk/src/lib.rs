//! Mnemo SDK - memory orchestration for stateless agents
//!
//! This crate wraps the engine in `mnemo-core` behind a single facade,
//! [`MemoryOrchestrator`], and supplies what the engine leaves pluggable:
//!
//! # Core Modules (from mnemo-core)
//!
//! - **buffer** - Bounded per-project short-term buffers
//! - **scoring** - Deterministic importance scoring
//! - **consolidation** - Summarize-and-migrate cycles
//! - **retrieval** - Attention-weighted search across both tiers
//! - **store** - In-memory and SQLite long-term stores
//!
//! # SDK Modules
//!
//! - **config** - `MnemoConfig`, loadable from TOML
//! - **providers** - Hash, fastembed and HTTP embedders, extractive summarizer
//! - **orchestrator** - The facade and its background consolidation worker
//! - **export** - Stable dump format for backup and migration
//!
//! # Features
//!
//! - `sqlite` (default) - SQLite long-term store
//! - `embeddings` - local all-MiniLM-L6-v2 embeddings via fastembed
//! - `http-embeddings` - OpenAI-compatible embedding endpoint via reqwest
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemo_sdk::{ImportanceSignals, MemoryMetadata, MemoryOrchestrator, MnemoConfig, SearchFilters};
//!
//! async fn example() -> mnemo_sdk::SdkResult<()> {
//!     let memory = MemoryOrchestrator::open(MnemoConfig::default()).await?;
//!
//!     // Record what an agent did
//!     memory
//!         .add_memory(
//!             "Switched the job queue to Redis streams",
//!             MemoryMetadata::new("billing").with_agent("architect-1"),
//!             &ImportanceSignals::new().with_role("architect").with_milestone(true),
//!         )
//!         .await?;
//!
//!     // Later, from another agent
//!     let hits = memory
//!         .search_memories("billing", "job queue", &SearchFilters::default(), 5)
//!         .await?;
//!     let context = memory.get_project_context("billing").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod providers;
pub mod stats;
mod worker;

// ─────────────────────────────────────────────────────────────────────────────
// Re-export core modules from mnemo-core
// ─────────────────────────────────────────────────────────────────────────────

/// Short-term buffers
pub use mnemo_core::buffer;

/// Consolidation engine
pub use mnemo_core::consolidation;

/// Attention-weighted retrieval
pub use mnemo_core::retrieval;

/// Importance scoring
pub use mnemo_core::scoring;

/// Long-term stores
pub use mnemo_core::store;

/// Core types (MemoryItem, ImportanceLevel, ItemState, etc.)
pub use mnemo_core::types;

pub use mnemo_core::{
    BufferConfig, ConsolidationConfig, ConsolidationReport, EmbeddingProvider, ErrorKind,
    ImportanceLevel, ImportanceSignals, ItemState, LongTermStore, MemoryItem, MemoryMetadata,
    MemoryType, ProviderLimits, RankedMemory, RetrievalConfig, RetryPolicy, ScoringConfig,
    SearchFilters, SearchOutcome, SourceTier, SummarizationProvider,
};

// ─────────────────────────────────────────────────────────────────────────────
// SDK exports
// ─────────────────────────────────────────────────────────────────────────────

pub use config::{
    ConfigValidationError, ContextConfig, EmbedderKind, HttpEmbedderConfig, MnemoConfig,
    ProviderConfig, StoreBackend, StoreConfig,
};
pub use error::{SdkError, SdkResult};
pub use export::{EXPORT_VERSION, ExportDump, ExportMetadata, ExportRecord};
pub use orchestrator::{
    ImportReport, MemoryOrchestrator, ProjectContext, PruneReport, PruneRequest,
};
pub use stats::{LifetimeCounters, MemoryStats};
