//! Memory item data model.
//!
//! A [`MemoryItem`] is created in the short-term buffer on every agent
//! interaction, optionally consolidated into long-term storage, and finally
//! retained or pruned. Content is immutable once created; a change produces a
//! new version that points back at the item it supersedes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorContext, Result};

/// Tag that pins an item to the critical tier and keeps its content verbatim
/// through consolidation.
pub const CRITICAL_TAG: &str = "critical";

/// Tag marking a milestone event.
pub const MILESTONE_TAG: &str = "milestone";

/// Tag added to long-term items produced by consolidation.
pub const CONSOLIDATED_TAG: &str = "consolidated";

/// Kind of memory being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Task or session context.
    #[default]
    Context,
    /// What happened: interactions and outcomes.
    Episodic,
    /// How to do something.
    Procedural,
    /// Facts and knowledge.
    Semantic,
}

impl MemoryType {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "context" => Some(Self::Context),
            "episodic" => Some(Self::Episodic),
            "procedural" => Some(Self::Procedural),
            "semantic" => Some(Self::Semantic),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Episodic => "episodic",
            Self::Procedural => "procedural",
            Self::Semantic => "semantic",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Categorical importance tier, ordered from least to most important.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceLevel {
    #[default]
    Trivial,
    Low,
    Medium,
    High,
    Critical,
}

impl ImportanceLevel {
    /// All tiers in ascending order.
    pub const ALL: [ImportanceLevel; 5] = [
        Self::Trivial,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(Self::Trivial),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Weight used by attention ranking. Strictly increasing with the tier.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.5,
            Self::Low => 0.3,
            Self::Trivial => 0.1,
        }
    }
}

impl fmt::Display for ImportanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of an item.
///
/// ```text
/// Created ──▶ PendingConsolidation ──▶ Consolidated ──┬─▶ Retained
///    └──────────────────────────────────▲               └─▶ Pruned
/// ```
///
/// `Retained` and `Pruned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Created,
    PendingConsolidation,
    Consolidated,
    Retained,
    Pruned,
}

impl ItemState {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "pending_consolidation" => Some(Self::PendingConsolidation),
            "consolidated" => Some(Self::Consolidated),
            "retained" => Some(Self::Retained),
            "pruned" => Some(Self::Pruned),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PendingConsolidation => "pending_consolidation",
            Self::Consolidated => "consolidated",
            Self::Retained => "retained",
            Self::Pruned => "pruned",
        }
    }

    /// Whether moving from `self` to `to` is a legal lifecycle step.
    ///
    /// Staying in the same state is allowed except for `Pruned`, which
    /// cannot be reached twice.
    pub fn can_transition_to(&self, to: ItemState) -> bool {
        use ItemState::*;
        match (self, to) {
            (Pruned, _) => false,
            (a, b) if *a == b => true,
            (Created, PendingConsolidation)
            | (Created, Consolidated)
            | (PendingConsolidation, Consolidated)
            | (Consolidated, Retained)
            | (Consolidated, Pruned) => true,
            _ => false,
        }
    }

    /// Whether the item lives in the short-term buffer in this state.
    pub fn is_short_term(&self) -> bool {
        matches!(self, Self::Created | Self::PendingConsolidation)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Item metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub memory_type: MemoryType,
}

impl MemoryMetadata {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Numeric importance and the tier it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImportanceScore {
    pub score: f64,
    pub level: ImportanceLevel,
}

/// A unit of agent memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: MemoryMetadata,
    importance_level: ImportanceLevel,
    importance_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u32,
    state: ItemState,
    /// Raw items folded into this one by consolidation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
    /// Id of the item this version replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    /// Failed consolidation attempts so far.
    #[serde(default)]
    pub consolidation_attempts: u32,
}

/// Persisted fields used to rehydrate an item from storage or an export.
#[derive(Debug, Clone)]
pub struct ItemParts {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: MemoryMetadata,
    pub importance: ImportanceScore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u32,
    pub state: ItemState,
    pub source_ids: Vec<String>,
    pub supersedes: Option<String>,
}

impl MemoryItem {
    /// Create a new, unscored item in the `Created` state.
    ///
    /// The id is derived from project, content and timestamp, so creating the
    /// same item twice yields the same id.
    pub fn new(content: impl Into<String>, metadata: MemoryMetadata, created_at: DateTime<Utc>) -> Self {
        let content = content.into();
        let id = derive_item_id(&metadata.project_id, &content, created_at);
        Self {
            id,
            content,
            embedding: None,
            metadata,
            importance_level: ImportanceLevel::Trivial,
            importance_score: 0.0,
            created_at,
            updated_at: created_at,
            access_count: 0,
            state: ItemState::Created,
            source_ids: Vec::new(),
            supersedes: None,
            consolidation_attempts: 0,
        }
    }

    /// Rehydrate a previously persisted item.
    pub fn from_parts(parts: ItemParts) -> Self {
        Self {
            id: parts.id,
            content: parts.content,
            embedding: parts.embedding,
            metadata: parts.metadata,
            importance_level: parts.importance.level,
            importance_score: parts.importance.score,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            access_count: parts.access_count,
            state: parts.state,
            source_ids: parts.source_ids,
            supersedes: parts.supersedes,
            consolidation_attempts: 0,
        }
    }

    /// Produce a new, unscored version of this item with different content.
    pub fn new_version(&self, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let mut next = Self::new(content, self.metadata.clone(), created_at);
        next.supersedes = Some(self.id.clone());
        next
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn project_id(&self) -> &str {
        &self.metadata.project_id
    }

    pub fn importance_level(&self) -> ImportanceLevel {
        self.importance_level
    }

    pub fn importance_score(&self) -> f64 {
        self.importance_score
    }

    pub fn importance(&self) -> ImportanceScore {
        ImportanceScore {
            score: self.importance_score,
            level: self.importance_level,
        }
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn is_critical(&self) -> bool {
        self.importance_level == ImportanceLevel::Critical
    }

    /// Only the importance scorer assigns importance.
    pub(crate) fn set_importance(&mut self, importance: ImportanceScore) {
        self.importance_level = importance.level;
        self.importance_score = importance.score;
    }

    /// Move to another lifecycle state.
    pub fn transition(&mut self, to: ItemState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
                context: ErrorContext {
                    project_id: Some(self.metadata.project_id.clone()),
                    item_id: Some(self.id.clone()),
                },
            });
        }
        if self.state != to {
            self.state = to;
            self.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Derive the idempotent id of a raw item.
pub fn derive_item_id(project_id: &str, content: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(created_at.timestamp_micros().to_le_bytes());
    format!("mem_{}", &hex::encode(hasher.finalize())[..32])
}

/// Derive the idempotent id of a consolidated group.
///
/// Source ids are sorted first, so the id depends only on the set of items.
pub fn derive_group_id(project_id: &str, agent_id: Option<&str>, source_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = source_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(agent_id.unwrap_or("").as_bytes());
    for id in sorted {
        hasher.update([0u8]);
        hasher.update(id.as_bytes());
    }
    format!("ltm_{}", &hex::encode(hasher.finalize())[..32])
}

/// Reject empty, oversized or control-character-laden content. Never truncates.
pub fn validate_content(content: &str, max_bytes: usize) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::validation("content cannot be empty"));
    }
    if content.len() > max_bytes {
        return Err(Error::validation(format!(
            "content is {} bytes, limit is {}",
            content.len(),
            max_bytes
        )));
    }
    if content.chars().any(|c| c == '\0') {
        return Err(Error::validation("content contains NUL characters"));
    }
    Ok(())
}

/// Project ids name storage partitions, so keep them to a safe alphabet.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        return Err(Error::validation("project_id is required"));
    }
    if project_id.len() > 128 {
        return Err(Error::validation("project_id must be 128 characters or less"));
    }
    if let Some(c) = project_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::validation(format!(
            "project_id contains invalid character '{}'",
            c
        )));
    }
    Ok(())
}
