//! SQLite-backed long-term store.
//!
//! Items live in a single table keyed by `(collection, id)`. Embeddings are
//! stored as little-endian f32 blobs and ranked in process by cosine
//! similarity.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tokio::sync::Mutex;
use tracing::info;

use super::{collection_name, rank_rows, validate_write};
use crate::error::{Error, Result};
use crate::providers::{LongTermStore, ScoredItem};
use crate::retrieval::SearchFilters;
use crate::types::{
    ImportanceLevel, ImportanceScore, ItemParts, ItemState, MemoryItem, MemoryMetadata, MemoryType,
    validate_project_id,
};
use crate::vector::{self, cosine_similarity};

/// Long-term tables SQL (001)
pub const LONG_TERM_SQL: &str = include_str!("migrations/001_long_term.sql");

const SELECT_COLUMNS: &str = "id, content, embedding, agent_id, tags, memory_type, \
     importance_level, importance_score, state, source_ids, supersedes, created_at, \
     updated_at, access_count";

/// Long-term store persisted in SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), dimension, "Opened long-term store");
        Self::with_connection(conn, dimension)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, dimension)
    }

    fn with_connection(conn: Connection, dimension: usize) -> Result<Self> {
        conn.execute_batch(LONG_TERM_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<MemoryItem>> {
        let sql = format!(
            "SELECT {} FROM long_term_memories WHERE collection = ?1 ORDER BY created_at, id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection], row_to_raw)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_item(collection)?);
        }
        Ok(items)
    }
}

/// Row fields as read from SQLite, before parsing.
struct RawRow {
    id: String,
    content: String,
    embedding: Vec<u8>,
    agent_id: Option<String>,
    tags: String,
    memory_type: String,
    importance_level: String,
    importance_score: f64,
    state: String,
    source_ids: String,
    supersedes: Option<String>,
    created_at: i64,
    updated_at: i64,
    access_count: i64,
}

fn row_to_raw(row: &Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        content: row.get(1)?,
        embedding: row.get(2)?,
        agent_id: row.get(3)?,
        tags: row.get(4)?,
        memory_type: row.get(5)?,
        importance_level: row.get(6)?,
        importance_score: row.get(7)?,
        state: row.get(8)?,
        source_ids: row.get(9)?,
        supersedes: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        access_count: row.get(13)?,
    })
}

fn timestamp(micros: i64) -> DateTime<Utc> {
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos).unwrap_or_default()
}

impl RawRow {
    fn into_item(self, collection: &str) -> Result<MemoryItem> {
        let project_id = collection
            .strip_prefix("mnemo_")
            .unwrap_or(collection)
            .to_string();
        let corrupt = |field: &str, value: &str| {
            Error::Serialization(format!("unknown {} '{}'", field, value))
                .with_project(&project_id)
        };

        let memory_type = MemoryType::from_str(&self.memory_type)
            .ok_or_else(|| corrupt("memory_type", &self.memory_type))?;
        let level = ImportanceLevel::from_str(&self.importance_level)
            .ok_or_else(|| corrupt("importance_level", &self.importance_level))?;
        let state =
            ItemState::from_str(&self.state).ok_or_else(|| corrupt("state", &self.state))?;

        Ok(MemoryItem::from_parts(ItemParts {
            id: self.id,
            content: self.content,
            embedding: Some(vector::decode(&self.embedding)?),
            metadata: MemoryMetadata {
                project_id,
                agent_id: self.agent_id,
                tags: serde_json::from_str(&self.tags)?,
                memory_type,
            },
            importance: ImportanceScore {
                score: self.importance_score,
                level,
            },
            created_at: timestamp(self.created_at),
            updated_at: timestamp(self.updated_at),
            access_count: u32::try_from(self.access_count.max(0)).unwrap_or(u32::MAX),
            state,
            source_ids: serde_json::from_str(&self.source_ids)?,
            supersedes: self.supersedes,
        }))
    }
}

#[async_trait]
impl LongTermStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn store(&self, item: &MemoryItem) -> Result<String> {
        let embedding = validate_write(item, self.dimension)?;
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO long_term_memories (
                collection, id, content, embedding, dimension, agent_id, tags, memory_type,
                importance_level, importance_score, state, source_ids, supersedes,
                created_at, updated_at, access_count
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT (collection, id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                dimension = excluded.dimension,
                agent_id = excluded.agent_id,
                tags = excluded.tags,
                memory_type = excluded.memory_type,
                importance_level = excluded.importance_level,
                importance_score = excluded.importance_score,
                state = CASE WHEN state = 'retained' THEN state ELSE excluded.state END,
                source_ids = excluded.source_ids,
                supersedes = excluded.supersedes,
                updated_at = excluded.updated_at,
                access_count = MAX(access_count, excluded.access_count)",
            params![
                collection_name(item.project_id()),
                item.id,
                item.content(),
                vector::encode(embedding),
                embedding.len() as i64,
                item.metadata.agent_id,
                serde_json::to_string(&item.metadata.tags)?,
                item.metadata.memory_type.as_str(),
                item.importance_level().as_str(),
                item.importance_score(),
                item.state().as_str(),
                serde_json::to_string(&item.source_ids)?,
                item.supersedes,
                item.created_at.timestamp_micros(),
                item.updated_at.timestamp_micros(),
                i64::from(item.access_count),
            ],
        )?;

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
        let items = {
            let conn = self.conn.lock().await;
            Self::load_collection(&conn, &collection_name(project_id))?
        };

        let mut rows: Vec<ScoredItem> = items
            .into_iter()
            .filter(|item| filters.matches(item))
            .map(|item| {
                let similarity = item
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(embedding, e))
                    .unwrap_or(0.0);
                ScoredItem { item, similarity }
            })
            .collect();
        rank_rows(&mut rows);
        rows.truncate(k);
        Ok(rows)
    }

    async fn get(&self, project_id: &str, id: &str) -> Result<Option<MemoryItem>> {
        let collection = collection_name(project_id);
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM long_term_memories WHERE collection = ?1 AND id = ?2",
            SELECT_COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![collection, id], row_to_raw)
            .optional()?;
        raw.map(|r| r.into_item(&collection)).transpose()
    }

    async fn delete(&self, project_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM long_term_memories WHERE collection = ?1 AND id = ?2",
            params![collection_name(project_id), id],
        )?;
        Ok(deleted > 0)
    }

    async fn list(&self, project_id: &str) -> Result<Vec<MemoryItem>> {
        let conn = self.conn.lock().await;
        Self::load_collection(&conn, &collection_name(project_id))
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM long_term_memories WHERE collection = ?1",
            params![collection_name(project_id)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    async fn record_access(&self, project_id: &str, ids: &[String]) -> Result<()> {
        let collection = collection_name(project_id);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE long_term_memories SET access_count = access_count + 1
                 WHERE collection = ?1 AND id = ?2",
            )?;
            for id in ids {
                stmt.execute(params![collection, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
