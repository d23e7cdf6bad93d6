//! HTTP request handlers.

use super::AppState;
use crate::db::HistoryRecord;
use crate::probe::CheckResult;
use crate::registry::ProbeMethod;
use crate::scheduler::LoopState;
use crate::snapshot::{SnapshotError, SnapshotState, StatusCounts};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

const WEBSITES: &str = "websites";
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 1000;

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn not_ready() -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, "status not yet available")
}

// ============================================================================
// Liveness
// ============================================================================

pub async fn handle_healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// API: Collections
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    pub key: String,
    pub name: String,
    pub method: ProbeMethod,
    pub interval_secs: u64,
    pub workers: usize,
    pub target_count: usize,
    pub groups: BTreeMap<String, String>,
    pub state: Option<LoopState>,
}

pub async fn handle_collections(State(state): State<AppState>) -> impl IntoResponse {
    let collections: Vec<CollectionInfo> = state
        .registry
        .collections()
        .iter()
        .map(|c| CollectionInfo {
            key: c.key.clone(),
            name: c.name.clone(),
            method: c.method,
            interval_secs: c.interval.as_secs(),
            workers: c.workers,
            target_count: c.targets.len(),
            groups: c.groups.iter().map(|g| (g.key.clone(), g.name.clone())).collect(),
            state: state.scheduler.state(&c.key),
        })
        .collect();

    Json(collections)
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub group: Option<String>,
    pub force: Option<String>,
}

impl StatusQuery {
    fn force(&self) -> bool {
        matches!(
            self.force.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub collection: String,
    pub name: String,
    /// Group the results were filtered to, if any.
    pub group: Option<String>,
    pub group_name: Option<String>,
    pub cycle: u64,
    pub last_update: DateTime<Utc>,
    pub duration_ms: u64,
    pub refresh_requested: bool,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub results: Vec<CheckResult>,
}

pub async fn handle_website_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    collection_status(&state, WEBSITES, &query).await
}

pub async fn handle_collection_status(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    collection_status(&state, &collection, &query).await
}

async fn collection_status(state: &AppState, key: &str, query: &StatusQuery) -> Response {
    let Some(collection) = state.registry.get(key) else {
        return error(StatusCode::NOT_FOUND, "unknown collection");
    };

    let refresh_requested = query.force() && state.scheduler.request_refresh(key);

    let snapshot = match state.snapshots.read(key).await {
        Ok(SnapshotState::Ready(s)) => s,
        Ok(SnapshotState::Pending) => return not_ready(),
        Err(SnapshotError::UnknownCollection(_)) => {
            return error(StatusCode::NOT_FOUND, "unknown collection")
        }
    };

    // An unknown group shows the whole collection
    let group = query.group.as_deref().and_then(|g| collection.group(g));

    let results: Vec<CheckResult> = match group {
        Some(g) => snapshot.in_group(&g.key).cloned().collect(),
        None => snapshot.results.values().cloned().collect(),
    };

    Json(StatusResponse {
        collection: collection.key.clone(),
        name: collection.name.clone(),
        group: group.map(|g| g.key.clone()),
        group_name: group.map(|g| g.name.clone()),
        cycle: snapshot.cycle,
        last_update: snapshot.completed_at,
        duration_ms: snapshot.duration_ms,
        refresh_requested,
        counts: StatusCounts::tally(&results),
        results,
    })
    .into_response()
}

pub async fn handle_website_target_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    target_status(&state, WEBSITES, &name).await
}

pub async fn handle_target_status(
    State(state): State<AppState>,
    Path((collection, name)): Path<(String, String)>,
) -> Response {
    target_status(&state, &collection, &name).await
}

async fn target_status(state: &AppState, key: &str, name: &str) -> Response {
    let Some(collection) = state.registry.get(key) else {
        return error(StatusCode::NOT_FOUND, "unknown collection");
    };
    let Some(target) = collection.target(name) else {
        return error(StatusCode::NOT_FOUND, "unknown target");
    };

    match state.snapshots.read(key).await {
        Ok(SnapshotState::Ready(snapshot)) => match snapshot.find(&target.name) {
            Some(result) => Json(result.clone()).into_response(),
            None => not_ready(),
        },
        Ok(SnapshotState::Pending) => not_ready(),
        Err(e) => error(StatusCode::NOT_FOUND, &e.to_string()),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub collection: Option<String>,
}

impl HistoryQuery {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }

    fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub history: Vec<HistoryRecord>,
}

pub async fn handle_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let (limit, offset) = (query.limit(), query.offset());

    match state
        .store
        .get_history(&name, query.collection.as_deref(), limit, offset)
    {
        Ok(history) => Json(HistoryResponse {
            name: Some(name),
            limit,
            offset,
            history,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(target_name = %name, error = %e, "Failed to load history");
            error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn handle_recent_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let (limit, offset) = (query.limit(), query.offset());

    match state.store.get_recent_history(limit, offset) {
        Ok(history) => Json(HistoryResponse {
            name: None,
            limit,
            offset,
            history,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load history");
            error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UptimeQuery {
    pub collection: Option<String>,
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UptimeQuery>,
) -> Response {
    match state.store.get_uptime(&name, query.collection.as_deref()) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!(target_name = %name, error = %e, "Failed to compute uptime");
            error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}
