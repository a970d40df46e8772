//! Long-term store adapters.
//!
//! Both adapters partition items into one collection per project, named by
//! [`collection_name`]. A query only ever touches the caller's collection.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::providers::ScoredItem;
use crate::types::{MemoryItem, validate_project_id};
use crate::vector;

/// Collection holding a project's items.
pub fn collection_name(project_id: &str) -> String {
    format!("mnemo_{}", project_id)
}

/// Write-side checks shared by the adapters.
pub(crate) fn validate_write(item: &MemoryItem, dimension: usize) -> Result<&[f32]> {
    validate_project_id(item.project_id())?;
    let embedding = item.embedding.as_deref().ok_or_else(|| {
        Error::validation("long-term items require an embedding")
            .with_project(item.project_id())
            .with_item(&item.id)
    })?;
    vector::validate_dimension(embedding, dimension)
        .map_err(|e| e.with_project(item.project_id()).with_item(&item.id))?;
    Ok(embedding)
}

/// Similarity descending, then newest first, then id.
pub(crate) fn rank_rows(rows: &mut [ScoredItem]) {
    rows.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.item.created_at.cmp(&a.item.created_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}
