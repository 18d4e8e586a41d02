use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use super::common::{
    created_response, map_service_error, message_response, success_response, validate_input,
};
use crate::{
    auth::{AuthRouterExt, AuthUser, Permission},
    errors::ApiError,
    services::management::{RouteInput, StageInput},
    AppState,
};

/// Stage dictionary and route templates
pub fn management_routes() -> Router<AppState> {
    let stages = Router::new()
        .route("/stages", get(list_stages).post(add_stage))
        .route("/stages/{id}", put(rename_stage).delete(delete_stage))
        .with_permission(Permission::MANAGE_STAGES);

    let routes = Router::new()
        .route("/routes", get(list_routes).post(add_route))
        .route(
            "/routes/{id}",
            get(get_route).put(edit_route).delete(delete_route),
        )
        .route("/routes/{id}/default", post(set_default_route))
        .with_permission(Permission::MANAGE_ROUTES);

    stages.merge(routes)
}

async fn list_stages(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stages = state
        .services
        .management
        .list_stages()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(stages))
}

async fn add_stage(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<StageInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let stage = state
        .services
        .management
        .add_stage(payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(stage))
}

async fn rename_stage(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<StageInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let stage = state
        .services
        .management
        .rename_stage(id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(stage))
}

async fn delete_stage(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .management
        .delete_stage(id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response("Этап удален"))
}

async fn list_routes(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let routes = state
        .services
        .management
        .list_routes()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(routes))
}

async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let route = state
        .services
        .management
        .get_route(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(route))
}

async fn add_route(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RouteInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let route = state
        .services
        .management
        .add_route(payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(route))
}

async fn edit_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<RouteInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let route = state
        .services
        .management
        .edit_route(id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(route))
}

async fn delete_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .management
        .delete_route(id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response("Маршрут удален"))
}

async fn set_default_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let route = state
        .services
        .management
        .set_default_route(id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(route))
}
