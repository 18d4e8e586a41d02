//! Parts tracker library
//!
//! Manufacturing parts tracking: parts and assemblies routed through production stages,
//! stage confirmation from QR scans, combined history, reports and user administration.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;
pub mod utils;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;

use crate::auth::{AuthConfig, AuthService};
use crate::events::EventBroadcaster;

/// Multipart framing on top of the configured file size
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub auth: Arc<AuthService>,
    pub events: EventBroadcaster,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> Self {
        let auth = Arc::new(AuthService::new(
            AuthConfig::new(
                config.jwt_secret.clone(),
                Duration::from_secs(config.jwt_expiration as u64),
                config.cookie_secure,
            ),
            db.clone(),
        ));
        let events = EventBroadcaster::new(config.event_channel_capacity);
        let services = handlers::AppServices::new(db.clone(), events.clone(), &config);
        Self {
            db,
            config,
            auth,
            events,
            services,
        }
    }
}

/// Routes under `/admin`: session endpoints plus the permission-gated administration API
pub fn admin_routes(auth: Arc<AuthService>) -> Router<AppState> {
    Router::new()
        .merge(handlers::parts::part_routes())
        .merge(handlers::management::management_routes())
        .merge(handlers::reports::report_routes())
        .merge(handlers::users::user_routes())
        .merge(auth::auth_routes().with_state(auth))
}

/// Full application router with shared layers applied.
pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .merge(handlers::tracking::public_routes())
        .merge(handlers::tracking::note_routes())
        .nest("/admin", admin_routes(state.auth.clone()))
        .route("/health", get(health_check))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            |State(auth): State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> axum::Json<Value> {
    let database = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };
    axum::Json(json!({
        "status": database,
        "checks": {
            "database": database,
            "event_subscribers": state.events.subscriber_count(),
        },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
