//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::types::{EntrySummary, ErrorResponse, ListEntriesResponse, RefreshRequest};
use crate::compose::SessionComposer;
use crate::error::RelayError;
use crate::launch::{LaunchExchange, LaunchRequest, LaunchResponse};
use crate::store::{ConnectionStore, ControlAction, FixedId};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConnectionStore>,
    pub composer: Arc<SessionComposer>,
    pub launch: Arc<LaunchExchange>,
}

impl AppState {
    pub fn new(
        store: Arc<ConnectionStore>,
        composer: Arc<SessionComposer>,
        launch: Arc<LaunchExchange>,
    ) -> Self {
        Self {
            store,
            composer,
            launch,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_error(err: RelayError) -> ApiError {
    let status = match &err {
        RelayError::NotFound(_) | RelayError::EntryNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::Operation(_) => StatusCode::CONFLICT,
        RelayError::Startup(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse::new(
            status.canonical_reason().unwrap_or("ERROR").to_uppercase(),
            err.to_string(),
        )),
    )
}

fn entry_id(state: &AppState, name: &str) -> Result<FixedId, ApiError> {
    state
        .store
        .by_name(name)
        .map(|entry| entry.id())
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::entry_not_found(name)),
            )
        })
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "shell-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List all entries.
pub async fn list_entries(State(state): State<AppState>) -> Json<ListEntriesResponse> {
    let mut entries: Vec<EntrySummary> = state
        .store
        .list()
        .iter()
        .map(EntrySummary::from_entry)
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Json(ListEntriesResponse {
        count: entries.len(),
        entries,
    })
}

/// Get one entry by name.
pub async fn get_entry(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<EntrySummary>, ApiError> {
    let entry = state.store.by_name(&name).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::entry_not_found(&name)),
        )
    })?;
    Ok(Json(EntrySummary::from_entry(&entry)))
}

/// Refresh an entry's live state.
pub async fn refresh_entry(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<RefreshRequest>>,
) -> Result<Json<EntrySummary>, ApiError> {
    let id = entry_id(&state, &name)?;
    let force = body.map(|Json(b)| b.force).unwrap_or(true);

    crate::store::refresh(&state.store, &state.composer, id, force)
        .await
        .map_err(map_error)?;

    let entry = state.store.get(id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::entry_not_found(&name)),
        )
    })?;
    Ok(Json(EntrySummary::from_entry(&entry)))
}

/// Issue a control action, then refresh.
pub async fn control_entry(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<EntrySummary>, ApiError> {
    let id = entry_id(&state, &name)?;

    let action = match action.as_str() {
        "start" => ControlAction::Start,
        "stop" => ControlAction::Stop,
        "pause" => ControlAction::Pause,
        other => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    "UNKNOWN_ACTION",
                    format!("Unknown control action '{}'", other),
                )),
            ))
        }
    };

    crate::store::control(&state.store, &state.composer, id, action)
        .await
        .map_err(map_error)?;

    let entry = state.store.get(id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::entry_not_found(&name)),
        )
    })?;
    Ok(Json(EntrySummary::from_entry(&entry)))
}

/// The launch exchange: name in, argument vector out.
pub async fn launch(
    State(state): State<AppState>,
    Json(request): Json<LaunchRequest>,
) -> Result<Json<LaunchResponse>, ApiError> {
    state.launch.handle(&request.name).map(Json).map_err(|e| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("NOT_FOUND", e.to_string())),
        )
    })
}

/// Delete an entry.
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = entry_id(&state, &name)?;
    state.store.remove(id).map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}
