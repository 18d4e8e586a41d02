use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::common::{
    created_response, map_service_error, message_response, read_upload, success_response,
    validate_input,
};
use crate::{
    auth::{AuthRouterExt, AuthUser, Permission},
    errors::ApiError,
    services::parts::{BulkAction, NewChildPart, NewPart, PartUpdate},
    AppState,
};

/// Part administration, each group behind its own permission
pub fn part_routes() -> Router<AppState> {
    let create = Router::new()
        .route("/parts", post(create_part))
        .route("/parts/import", post(import_parts))
        .route("/parts/{part_id}/children", post(add_child_part))
        .with_permission(Permission::ADD_PARTS);

    let edit = Router::new()
        .route("/parts/{part_id}", get(get_part).put(edit_part))
        .route("/parts/{part_id}/route", put(change_route))
        .route("/parts/{part_id}/responsible", put(change_responsible))
        .route("/parts/{part_id}/drawing", post(upload_drawing))
        .route("/history/{history_id}", delete(cancel_stage))
        .with_permission(Permission::EDIT_PARTS);

    let remove = Router::new()
        .route("/parts/{part_id}", delete(delete_part))
        .route("/parts/bulk", post(bulk_action))
        .with_permission(Permission::DELETE_PARTS);

    let qr = Router::new()
        .route("/parts/qr-preview", post(qr_preview))
        .with_permission(Permission::GENERATE_QR);

    let drawings = Router::new()
        .route("/drawings/{filename}", get(serve_drawing))
        .with_auth();

    create.merge(edit).merge(remove).merge(qr).merge(drawings)
}

#[derive(Debug, Deserialize)]
pub struct ChangeRouteRequest {
    pub route_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct ChangeResponsibleRequest {
    /// `None` clears the responsible user
    pub user_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PartSelection {
    #[serde(default)]
    pub part_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkActionRequest {
    pub action: BulkAction,
    #[serde(default)]
    pub part_ids: Vec<String>,
}

async fn create_part(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<NewPart>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let part = state
        .services
        .parts
        .create_single_part(payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(part))
}

async fn add_child_part(
    State(state): State<AppState>,
    user: AuthUser,
    Path(parent_id): Path<String>,
    Json(payload): Json<NewChildPart>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let part = state
        .services
        .parts
        .add_child_part(&parent_id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(part))
}

async fn import_parts(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_upload(multipart, "file", state.config.max_upload_bytes)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Файл не выбран".into()))?;

    let summary = state
        .services
        .parts
        .import_from_file(&upload.file_name, &upload.content, &user)
        .await
        .map_err(map_service_error)?;
    info!(
        file = %upload.file_name,
        added = summary.added,
        skipped = summary.skipped,
        "Parts imported"
    );
    Ok(success_response(serde_json::json!({
        "message": format!(
            "Импорт завершен. Добавлено: {}, пропущено: {}.",
            summary.added, summary.skipped
        ),
        "added": summary.added,
        "skipped": summary.skipped,
    })))
}

async fn get_part(
    State(state): State<AppState>,
    Path(part_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let part = state
        .services
        .parts
        .get_part(&part_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(part))
}

async fn edit_part(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
    Json(payload): Json<PartUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let part = state
        .services
        .parts
        .edit_part(&part_id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(part))
}

async fn change_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
    Json(payload): Json<ChangeRouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state
        .services
        .parts
        .change_part_route(&part_id, payload.route_id, &user)
        .await
        .map_err(map_service_error)?;
    let message = if changed {
        format!("Маршрут для детали {} изменен", part_id)
    } else {
        format!("Маршрут для детали {} не изменился", part_id)
    };
    Ok(success_response(
        serde_json::json!({ "message": message, "changed": changed }),
    ))
}

async fn change_responsible(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
    Json(payload): Json<ChangeResponsibleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let part = state
        .services
        .parts
        .change_responsible(&part_id, payload.user_id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(part))
}

async fn upload_drawing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_upload(multipart, "drawing", state.config.max_upload_bytes)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Файл не выбран".into()))?;
    let part = state
        .services
        .parts
        .attach_drawing(&part_id, &upload.file_name, &upload.content, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(part))
}

async fn cancel_stage(
    State(state): State<AppState>,
    user: AuthUser,
    Path(history_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let part = state
        .services
        .parts
        .cancel_stage_by_history_id(history_id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(part))
}

async fn delete_part(
    State(state): State<AppState>,
    user: AuthUser,
    Path(part_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .parts
        .delete_single_part(&part_id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response(format!(
        "Деталь {} и вся ее история удалены",
        part_id
    )))
}

async fn bulk_action(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<BulkActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .services
        .parts
        .bulk_action(payload.action, &payload.part_ids, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({
        "message": format!("Удалено деталей: {}", count),
        "deleted": count,
    })))
}

async fn qr_preview(
    State(state): State<AppState>,
    Json(payload): Json<PartSelection>,
) -> Result<impl IntoResponse, ApiError> {
    let labels = state
        .services
        .parts
        .qr_print_preview(&payload.part_ids)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({ "labels": labels })))
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn serve_drawing(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let content = state
        .services
        .parts
        .drawings()
        .read(&filename)
        .await
        .map_err(map_service_error)?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], content))
}
