//! Memory routes.
//!
//! All routes are scoped to a project:
//! - POST /projects/{project}/memories - Add a memory
//! - GET  /projects/{project}/memories/search - Ranked search
//! - POST /projects/{project}/memories/{id}/retain - Pin a long-term memory
//! - GET  /projects/{project}/context - Recent and relevant memories
//! - POST /projects/{project}/consolidate - Run a consolidation cycle
//! - POST /projects/{project}/prune - Prune long-term memories
//! - GET  /projects/{project}/export - Stable dump
//! - POST /projects/{project}/import - Load a dump
//! - GET  /projects/{project}/stats - Counters

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use mnemo_core::{ErrorKind, ScoreBreakdown};
use mnemo_sdk::{
    ConsolidationReport, ExportDump, ImportReport, ImportanceLevel, ImportanceSignals, ItemState,
    MemoryItem, MemoryMetadata, MemoryStats, MemoryType, PruneReport, PruneRequest,
    RankedMemory, SdkError, SearchFilters, SourceTier,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Create memory router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/{project}/memories", post(add_memory))
        .route("/projects/{project}/memories/search", get(search_memories))
        .route("/projects/{project}/memories/{id}/retain", post(retain))
        .route("/projects/{project}/context", get(get_context))
        .route("/projects/{project}/consolidate", post(consolidate))
        .route("/projects/{project}/prune", post(prune))
        .route("/projects/{project}/export", get(export))
        .route("/projects/{project}/import", post(import))
        .route("/projects/{project}/stats", get(stats))
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn api_error(e: SdkError) -> (StatusCode, String) {
    let status = match e.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::TransientProvider | ErrorKind::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Cancelled | ErrorKind::Consistency | ErrorKind::InvalidTransition => {
            StatusCode::CONFLICT
        }
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemoryRequest {
    pub content: String,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub memory_type: Option<String>,
    pub agent_role: Option<String>,
    #[serde(default)]
    pub has_human_input: bool,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub is_milestone: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemoryResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMemoriesQuery {
    pub query: String,
    pub limit: Option<usize>,
    pub agent_id: Option<String>,
    /// Comma-separated
    pub tags: Option<String>,
    /// Comma-separated
    pub memory_types: Option<String>,
    pub min_importance: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResponse {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub tags: Vec<String>,
    pub memory_type: MemoryType,
    pub importance_level: ImportanceLevel,
    pub importance_score: f64,
    pub state: ItemState,
    pub access_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MemoryItem> for MemoryResponse {
    fn from(item: MemoryItem) -> Self {
        Self {
            content: item.content().to_string(),
            importance_level: item.importance_level(),
            importance_score: item.importance_score(),
            state: item.state(),
            id: item.id,
            agent_id: item.metadata.agent_id,
            tags: item.metadata.tags,
            memory_type: item.metadata.memory_type,
            access_count: item.access_count,
            source_ids: item.source_ids,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMemoryResponse {
    pub memory: MemoryResponse,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub source: SourceTier,
}

impl From<RankedMemory> for RankedMemoryResponse {
    fn from(ranked: RankedMemory) -> Self {
        Self {
            memory: ranked.item.into(),
            score: ranked.score,
            breakdown: ranked.breakdown,
            source: ranked.source,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<RankedMemoryResponse>,
    pub store_available: bool,
    pub query_embedded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub project_id: String,
    pub recent: Vec<MemoryResponse>,
    pub relevant: Vec<RankedMemoryResponse>,
    pub store_available: bool,
}

// ============================================================================
// Handlers
// ============================================================================

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}

/// Add a memory
pub async fn add_memory(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(req): Json<AddMemoryRequest>,
) -> ApiResult<(StatusCode, Json<AddMemoryResponse>)> {
    let memory_type = match req.memory_type.as_deref() {
        Some(t) => MemoryType::from_str(t)
            .ok_or_else(|| bad_request(format!("unknown memory type '{}'", t)))?,
        None => MemoryType::default(),
    };

    let mut metadata = MemoryMetadata::new(project)
        .with_tags(req.tags)
        .with_type(memory_type);
    metadata.agent_id = req.agent_id;

    let mut signals = ImportanceSignals::new()
        .with_human_input(req.has_human_input)
        .with_error(req.has_error)
        .with_milestone(req.is_milestone);
    signals.agent_role = req.agent_role;

    let id = state
        .memory
        .add_memory(&req.content, metadata, &signals)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(AddMemoryResponse { id })))
}

/// Ranked search across both tiers
pub async fn search_memories(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(query): Query<SearchMemoriesQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let memory_types = split_list(query.memory_types.as_deref())
        .iter()
        .map(|t| {
            MemoryType::from_str(t).ok_or_else(|| bad_request(format!("unknown memory type '{}'", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let min_importance = match query.min_importance.as_deref() {
        Some(level) => Some(
            ImportanceLevel::from_str(level)
                .ok_or_else(|| bad_request(format!("unknown importance level '{}'", level)))?,
        ),
        None => None,
    };

    let filters = SearchFilters {
        agent_id: query.agent_id,
        memory_types,
        tags: split_list(query.tags.as_deref()),
        min_importance,
    };

    let outcome = state
        .memory
        .search_memories(&project, &query.query, &filters, query.limit.unwrap_or(0))
        .await
        .map_err(api_error)?;

    Ok(Json(SearchResponse {
        results: outcome.results.into_iter().map(Into::into).collect(),
        store_available: outcome.store_available,
        query_embedded: outcome.query_embedded,
    }))
}

/// Recent and relevant memories for an agent joining the project
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<ContextResponse>> {
    let context = state
        .memory
        .get_project_context(&project)
        .await
        .map_err(api_error)?;

    Ok(Json(ContextResponse {
        project_id: context.project_id,
        recent: context.recent.into_iter().map(Into::into).collect(),
        relevant: context.relevant.into_iter().map(Into::into).collect(),
        store_available: context.store_available,
    }))
}

/// Run a consolidation cycle now
pub async fn consolidate(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<ConsolidationReport>> {
    let report = state
        .memory
        .consolidate_now(&project)
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

/// Prune long-term memories
pub async fn prune(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(req): Json<PruneRequest>,
) -> ApiResult<Json<PruneReport>> {
    let report = state
        .memory
        .prune(&project, &req)
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

/// Pin a long-term memory so prune never removes it
pub async fn retain(
    State(state): State<Arc<AppState>>,
    Path((project, id)): Path<(String, String)>,
) -> ApiResult<Json<MemoryResponse>> {
    let item = state
        .memory
        .retain(&project, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(item.into()))
}

/// Export a project
pub async fn export(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<ExportDump>> {
    let dump = state.memory.export(&project).await.map_err(api_error)?;
    Ok(Json(dump))
}

/// Import a dump into the project named in the path
pub async fn import(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(dump): Json<ExportDump>,
) -> ApiResult<Json<ImportReport>> {
    if dump.project_id != project {
        return Err(bad_request(format!(
            "dump belongs to project '{}', not '{}'",
            dump.project_id, project
        )));
    }
    let report = state.memory.import(&dump).await.map_err(api_error)?;
    Ok(Json(report))
}

/// Project counters
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<MemoryStats>> {
    let stats = state.memory.stats(&project).await.map_err(api_error)?;
    Ok(Json(stats))
}
