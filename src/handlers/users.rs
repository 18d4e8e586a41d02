use super::common::{
    created_response, map_service_error, message_response, success_response, validate_input,
    PaginatedResponse, PaginationParams,
};
use crate::{
    auth::{AuthRouterExt, AuthUser, Permission},
    errors::ApiError,
    services::{
        audit::CATEGORY_USER,
        queries::AuditLogFilter,
        users::{NewUser, RoleInput, UserUpdate},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use tracing::info;

/// Users, roles and the audit trail
pub fn user_routes() -> Router<AppState> {
    let accounts = Router::new()
        .route("/users", get(list_users).post(add_user))
        .route("/users/{id}", put(edit_user).delete(delete_user))
        .route("/roles", get(list_roles).post(add_role))
        .route("/roles/{id}", put(edit_role).delete(delete_role))
        .with_permission(Permission::MANAGE_USERS);

    let logs = Router::new()
        .route("/audit-log", get(audit_log))
        .route("/user-log", get(user_log))
        .with_permission(Permission::VIEW_AUDIT_LOG);

    accounts.merge(logs)
}

async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .services
        .users
        .list_users()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(users))
}

async fn add_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let created = state
        .services
        .users
        .add_user(payload, &user)
        .await
        .map_err(map_service_error)?;
    info!(user_id = created.id, by = %user.username, "User added");
    Ok(created_response(created))
}

async fn edit_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<UserUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let updated = state
        .services
        .users
        .edit_user(id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(updated))
}

async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .users
        .delete_user(id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response("Пользователь удален"))
}

async fn list_roles(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let roles = state
        .services
        .users
        .list_roles()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(roles))
}

async fn add_role(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RoleInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let role = state
        .services
        .users
        .add_role(payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(role))
}

async fn edit_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<RoleInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let role = state
        .services
        .users
        .edit_role(id, payload, &user)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(role))
}

async fn delete_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .users
        .delete_role(id, &user)
        .await
        .map_err(map_service_error)?;
    Ok(message_response("Роль удалена"))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub category: Option<String>,
    pub part_id: Option<String>,
    pub user_id: Option<i32>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl AuditLogQuery {
    fn split(self) -> (AuditLogFilter, PaginationParams) {
        let defaults = PaginationParams::default();
        (
            AuditLogFilter {
                category: self.category,
                part_id: self.part_id,
                user_id: self.user_id,
            },
            PaginationParams {
                page: self.page.unwrap_or(defaults.page),
                per_page: self.per_page.unwrap_or(defaults.per_page),
            },
        )
    }
}

async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (filter, pagination) = query.split();
    let (page, per_page) = pagination.normalized();
    let (entries, total) = state
        .services
        .queries
        .list_audit_logs(&filter, page, per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        entries, page, per_page, total,
    )))
}

/// Audit entries of the `user` category
async fn user_log(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let filter = AuditLogFilter {
        category: Some(CATEGORY_USER.to_string()),
        ..Default::default()
    };
    let (entries, total) = state
        .services
        .queries
        .list_audit_logs(&filter, page, per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        entries, page, per_page, total,
    )))
}
