//! Shop-floor endpoints: dashboard, product tables, scanning, history and notes.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

use super::common::{map_service_error, message_response, success_response, validate_input};
use crate::{
    auth::{AuthRouterExt, AuthUser, MaybeAuthUser},
    errors::ApiError,
    events::event_stream,
    services::{
        notes::NoteInput,
        parts::StageConfirmation,
        progression::Progression,
        queries::PartsFilter,
    },
    AppState,
};

/// Dashboard, product tables, scan pages and history; a session is optional.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/products/{designation}/parts", get(parts_for_product))
        .route("/scan/{part_id}", get(select_stage))
        .route("/scan/{part_id}/stages/{stage_id}", post(confirm_stage))
        .route("/history/{part_id}", get(part_history))
        .with_optional_auth()
        .route("/events", get(event_stream))
}

/// Note editing; requires a signed-in user.
pub fn note_routes() -> Router<AppState> {
    Router::new()
        .route("/parts/{part_id}/notes", post(add_note))
        .route("/notes/{note_id}", put(edit_note).delete(delete_note))
        .with_auth()
}

async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let products = state
        .services
        .queries
        .dashboard()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({ "products": products })))
}

async fn parts_for_product(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(designation): Path<String>,
    Query(filter): Query<PartsFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let parts = state
        .services
        .queries
        .parts_for_product(&designation, &filter, viewer.as_ref())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(parts))
}

async fn select_stage(
    State(state): State<AppState>,
    Path(part_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let selection = state
        .services
        .queries
        .select_stage(&part_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(selection))
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    message: String,
    part_id: String,
    quantity_completed: i32,
    quantity_total: i32,
    current_status: String,
    history_id: i32,
    progression: Progression,
}

async fn confirm_stage(
    State(state): State<AppState>,
    MaybeAuthUser(actor): MaybeAuthUser,
    Path((part_id, stage_id)): Path<(String, i32)>,
    Json(payload): Json<StageConfirmation>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let confirmed = state
        .services
        .parts
        .confirm_stage(&part_id, stage_id, payload, actor.as_ref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ConfirmResponse {
        message: format!(
            "Этап '{}' для детали {} подтвержден ({} шт.)",
            confirmed.history.status, confirmed.part.part_id, confirmed.history.quantity
        ),
        part_id: confirmed.part.part_id,
        quantity_completed: confirmed.part.quantity_completed,
        quantity_total: confirmed.part.quantity_total,
        current_status: confirmed.part.current_status,
        history_id: confirmed.history.id,
        progression: confirmed.progression,
    }))
}

async fn part_history(
    State(state): State<AppState>,
    Path(part_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .services
        .queries
        .get_combined_history(&part_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(history))
}

async fn add_note(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
    Json(payload): Json<NoteInput>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state
        .services
        .notes
        .add_note(&part_id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(super::common::created_response(note))
}

async fn edit_note(
    State(state): State<AppState>,
    user: AuthUser,
    Path(note_id): Path<i32>,
    Json(payload): Json<NoteInput>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state
        .services
        .notes
        .edit_note(note_id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(note))
}

async fn delete_note(
    State(state): State<AppState>,
    user: AuthUser,
    Path(note_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let part_id = state
        .services
        .notes
        .delete_note(note_id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response(format!(
        "Примечание к детали {} удалено",
        part_id
    )))
}
