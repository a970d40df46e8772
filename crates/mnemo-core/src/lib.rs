//! mnemo-core: dual-memory engine for stateless agents
//!
//! This crate holds the engine behind the orchestrator:
//! - Memory item data model and lifecycle
//! - Deterministic importance scoring
//! - Bounded per-project short-term buffers
//! - Capability traits for embedding, summarization and long-term storage
//! - Consolidation of buffer contents into the long-term store
//! - Attention-weighted retrieval across both tiers

pub mod buffer;
pub mod consolidation;
pub mod error;
pub mod providers;
pub mod retrieval;
pub mod scoring;
pub mod store;
#[cfg(test)]
mod testing;
pub mod types;
pub mod vector;

pub use buffer::{AppendOutcome, BufferConfig, BufferRegistry, ShortTermBuffer};
pub use consolidation::{ConsolidationConfig, ConsolidationEngine, ConsolidationReport};
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use providers::{
    EmbeddingProvider, LongTermStore, Providers, ProviderLimits, RetryPolicy, ScoredItem,
    SummarizationProvider,
};
pub use retrieval::{
    AttentionRetriever, RankedMemory, RetrievalConfig, RetrievalWeights, ScoreBreakdown,
    SearchFilters, SearchOutcome, SourceTier,
};
pub use scoring::{ImportanceScorer, ImportanceSignals, ScoringConfig};
pub use store::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use types::{
    ImportanceLevel, ImportanceScore, ItemParts, ItemState, MemoryItem, MemoryMetadata,
    MemoryType,
};
