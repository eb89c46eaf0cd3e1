//! Sync Routes
//!
//! Endpoints for the explicit sync path and the administrative dedup pass.
//!
//! - POST /api/v1/users/:author/sync - Explicit sync + merge (pull-to-refresh)
//! - GET /api/v1/sync/status - Last sync state
//! - POST /api/v1/users/:author/dedupe - Collapse duplicate days

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{
    DedupResponse, SyncRequest, SyncResponse, SyncStatusDto, SyncStatusResponse,
};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/users/:author/sync
///
/// The foreground sync path: import from the health source, pull the remote
/// set, merge it into the local store, drain pending exports. Returns the
/// merged totals; a partial merge is reported in `error` without failing the
/// request.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(author): Path<String>,
    body: Option<Json<SyncRequest>>,
) -> ApiResult<(StatusCode, Json<SyncResponse>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let entries = state
        .engine
        .read_all_remote(&author, req.account_created)
        .await?;

    let status = state.engine.status().await;
    let last = status.last_status.as_ref();

    let response = SyncResponse {
        status: if last.and_then(|s| s.error.as_ref()).is_some() {
            "partial".to_string()
        } else {
            "success".to_string()
        },
        total: entries.len(),
        imported: last.map(|s| s.imported).unwrap_or(0),
        merged: last.map(|s| s.merged).unwrap_or(0),
        exported: last.map(|s| s.exported).unwrap_or(0),
        error: last.and_then(|s| s.error.clone()),
    };

    tracing::info!(
        author = %author,
        total = response.total,
        imported = response.imported,
        "manual sync completed"
    );

    Ok((StatusCode::OK, Json(response)))
}

/// GET /api/v1/sync/status
///
/// Last sync outcome and whether a health source is configured.
pub async fn get_sync_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<SyncStatusResponse>> {
    let status = state.engine.status().await;

    Ok(Json(SyncStatusResponse {
        last_sync_timestamp: status.last_sync_timestamp,
        last_status: status.last_status.as_ref().map(SyncStatusDto::from),
        external_source_available: state.engine.has_external_source(),
    }))
}

/// POST /api/v1/users/:author/dedupe
///
/// Administrative cleanup: collapse each day with multiple live entries down
/// to the earliest one. Destructive and O(entries); invoked explicitly.
pub async fn dedupe_entries(
    State(state): State<Arc<AppState>>,
    Path(author): Path<String>,
) -> ApiResult<Json<DedupResponse>> {
    let report = state.engine.dedupe_entries_by_day(&author).await?;

    tracing::info!(
        author = %author,
        days = report.days_collapsed,
        removed = report.entries_removed,
        "dedup pass completed"
    );

    Ok(Json(DedupResponse::from(&report)))
}
