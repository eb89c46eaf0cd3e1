//! Entry Routes
//!
//! CRUD endpoints for metric entries.
//!
//! - GET /api/v1/users/:author/entries - List the author's entries (local read)
//! - POST /api/v1/users/:author/entries - Create an entry
//! - PUT /api/v1/entries/:id - Correct an entry's value or date
//! - DELETE /api/v1/entries/:id - Delete an entry from both stores

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::dto::{CreateEntryRequest, EntryListResponse, EntryResponse, UpdateEntryRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{EntrySource, MetricEntry};

/// Query parameters for the list endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Include soft-deleted entries
    #[serde(default)]
    pub include_deleted: bool,
}

/// GET /api/v1/users/:author/entries
///
/// The non-blocking read path: returns what the local store holds and
/// triggers a background import when a health source is configured.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(author): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<EntryListResponse>> {
    validate_author(&author)?;

    let entries = state.engine.read_all_local_for(&author).await?;

    let responses: Vec<EntryResponse> = entries
        .iter()
        .filter(|e| params.include_deleted || e.is_live())
        .map(EntryResponse::from)
        .collect();

    Ok(Json(EntryListResponse {
        total: responses.len(),
        entries: responses,
    }))
}

/// POST /api/v1/users/:author/entries
///
/// Create a manual entry. Local write first, remote and export follow.
pub async fn create_entry(
    State(state): State<Arc<AppState>>,
    Path(author): Path<String>,
    Json(req): Json<CreateEntryRequest>,
) -> ApiResult<(StatusCode, Json<EntryResponse>)> {
    validate_author(&author)?;
    validate_value(req.value)?;

    let date = req.date.unwrap_or_else(Utc::now);
    let entry = MetricEntry::new(&author, req.value, date, EntrySource::Manual);

    let created = state.engine.create(entry).await?;

    tracing::info!(author = %author, id = %created.id, "created entry");

    Ok((StatusCode::CREATED, Json(EntryResponse::from(&created))))
}

/// PUT /api/v1/entries/:id
///
/// Correct an entry's value or date.
pub async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntryRequest>,
) -> ApiResult<Json<EntryResponse>> {
    let id = parse_entry_id(&id)?;

    let mut entry = state.engine.entry(id)?;
    if let Some(value) = req.value {
        validate_value(value)?;
        entry.value = value;
    }
    if let Some(date) = req.date {
        entry.date = date;
    }

    let updated = state.engine.update(entry).await?;

    Ok(Json(EntryResponse::from(&updated)))
}

/// DELETE /api/v1/entries/:id
///
/// Hard-delete an entry from both stores.
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_entry_id(&id)?;

    state.engine.delete(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn parse_entry_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::Validation(format!("Invalid entry id: {}", raw)))
}

fn validate_author(author: &str) -> ApiResult<()> {
    if author.is_empty() {
        return Err(ApiError::Validation("Author id cannot be empty".to_string()));
    }

    if author.len() > 100 {
        return Err(ApiError::Validation(
            "Author id exceeds maximum length of 100 characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_value(value: f64) -> ApiResult<()> {
    if !value.is_finite() {
        return Err(ApiError::Validation(
            "Value must be a finite number".to_string(),
        ));
    }

    if value < 0.0 {
        return Err(ApiError::Validation(
            "Value cannot be negative".to_string(),
        ));
    }

    Ok(())
}
