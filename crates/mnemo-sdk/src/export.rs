//! Stable export format.
//!
//! A dump holds every live item of one project, both tiers, ordered by
//! creation time then id, so exporting an unchanged project twice yields the
//! same items in the same order. Embeddings are not written out; long-term
//! records carry an `embedding_ref` naming where the vector lived, and import
//! re-embeds the content.

use chrono::{DateTime, Utc};
use mnemo_core::store::collection_name;
use mnemo_core::{
    ImportanceLevel, ImportanceScore, ItemParts, ItemState, MemoryItem, MemoryMetadata,
    MemoryType, SourceTier,
};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Current dump format version.
pub const EXPORT_VERSION: u32 = 1;

/// Serialized project dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDump {
    pub version: u32,
    pub project_id: String,
    pub exported_at: DateTime<Utc>,
    pub items: Vec<ExportRecord>,
}

/// Metadata as persisted. The project is implied by the dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub memory_type: MemoryType,
}

/// One persisted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub content: String,
    pub embedding_ref: Option<String>,
    pub metadata: ExportMetadata,
    pub importance_level: ImportanceLevel,
    #[serde(default)]
    pub importance_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u32,
    #[serde(default)]
    pub state: ItemState,
    pub tier: SourceTier,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl ExportRecord {
    pub fn from_item(item: &MemoryItem, tier: SourceTier, store_name: &str) -> Self {
        let embedding_ref = match tier {
            SourceTier::LongTerm => Some(format!(
                "{}:{}/{}",
                store_name,
                collection_name(item.project_id()),
                item.id
            )),
            SourceTier::Buffer => None,
        };
        Self {
            id: item.id.clone(),
            content: item.content().to_string(),
            embedding_ref,
            metadata: ExportMetadata {
                agent_id: item.metadata.agent_id.clone(),
                tags: item.metadata.tags.clone(),
                memory_type: item.metadata.memory_type,
            },
            importance_level: item.importance_level(),
            importance_score: item.importance_score(),
            created_at: item.created_at,
            updated_at: item.updated_at,
            access_count: item.access_count,
            state: item.state(),
            tier,
            source_ids: item.source_ids.clone(),
            supersedes: item.supersedes.clone(),
        }
    }

    /// Rebuild the item for `project_id`, without an embedding.
    /// Buffer records come back `Created`.
    pub fn to_item(&self, project_id: &str) -> MemoryItem {
        let state = match self.tier {
            SourceTier::Buffer => ItemState::Created,
            SourceTier::LongTerm => match self.state {
                ItemState::Retained => ItemState::Retained,
                _ => ItemState::Consolidated,
            },
        };
        MemoryItem::from_parts(ItemParts {
            id: self.id.clone(),
            content: self.content.clone(),
            embedding: None,
            metadata: MemoryMetadata {
                project_id: project_id.to_string(),
                agent_id: self.metadata.agent_id.clone(),
                tags: self.metadata.tags.clone(),
                memory_type: self.metadata.memory_type,
            },
            importance: ImportanceScore {
                score: self.importance_score,
                level: self.importance_level,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            access_count: self.access_count,
            state,
            source_ids: self.source_ids.clone(),
            supersedes: self.supersedes.clone(),
        })
    }
}

impl ExportDump {
    pub fn new(project_id: impl Into<String>, mut items: Vec<ExportRecord>) -> Self {
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self {
            version: EXPORT_VERSION,
            project_id: project_id.into(),
            exported_at: Utc::now(),
            items,
        }
    }

    pub fn to_json(&self) -> SdkResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> SdkResult<Self> {
        let dump: Self = serde_json::from_str(s)?;
        dump.check_version()?;
        Ok(dump)
    }

    pub(crate) fn check_version(&self) -> SdkResult<()> {
        if self.version != EXPORT_VERSION {
            return Err(SdkError::validation(format!(
                "unsupported export version {} (expected {})",
                self.version, EXPORT_VERSION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, minutes_ago: i64) -> ExportRecord {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        ExportRecord {
            id: id.into(),
            content: format!("content of {}", id),
            embedding_ref: None,
            metadata: ExportMetadata::default(),
            importance_level: ImportanceLevel::Medium,
            importance_score: 0.5,
            created_at: at,
            updated_at: at,
            access_count: 0,
            state: ItemState::Created,
            tier: SourceTier::Buffer,
            source_ids: Vec::new(),
            supersedes: None,
        }
    }

    #[test]
    fn test_dump_orders_items() {
        let dump = ExportDump::new("demo", vec![record("b", 1), record("a", 5), record("c", 1)]);
        let ids: Vec<&str> = dump.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids[0], "a");
        assert_eq!(dump.version, EXPORT_VERSION);
    }

    #[test]
    fn test_schema_field_names() {
        let dump = ExportDump::new("demo", vec![record("a", 0)]);
        let value: serde_json::Value = serde_json::from_str(&dump.to_json().unwrap()).unwrap();
        let item = &value["items"][0];
        for field in [
            "id",
            "content",
            "embedding_ref",
            "metadata",
            "importance_level",
            "created_at",
            "updated_at",
            "access_count",
        ] {
            assert!(item.get(field).is_some(), "missing {field}");
        }
        assert!(item["metadata"].get("tags").is_some());
        assert_eq!(item["importance_level"], "medium");
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut dump = ExportDump::new("demo", vec![]);
        dump.version = 99;
        let json = serde_json::to_string(&dump).unwrap();
        assert!(ExportDump::from_json(&json).unwrap_err().is_validation());
    }

    #[test]
    fn test_long_term_record_keeps_reference_and_state() {
        let mut item = MemoryItem::new("deploy notes", MemoryMetadata::new("demo"), Utc::now());
        item.transition(ItemState::Consolidated).unwrap();
        let rec = ExportRecord::from_item(&item, SourceTier::LongTerm, "sqlite");
        assert_eq!(
            rec.embedding_ref.as_deref(),
            Some(format!("sqlite:mnemo_demo/{}", item.id).as_str())
        );

        let back = rec.to_item("demo");
        assert_eq!(back.id, item.id);
        assert_eq!(back.state(), ItemState::Consolidated);
        assert!(back.embedding.is_none());
    }
}
