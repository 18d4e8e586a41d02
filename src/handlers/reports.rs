use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};

use super::common::{map_service_error, success_response};
use crate::{
    auth::{AuthRouterExt, Permission},
    errors::ApiError,
    services::reports::DateRange,
    AppState,
};

/// Chart data for the reporting pages
pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reports/operator-performance", get(operator_performance))
        .route("/reports/stage-duration", get(stage_duration))
        .route("/reports/order-completion", get(order_completion))
        .route("/reports/defect-analysis", get(defect_analysis))
        .with_permission(Permission::VIEW_REPORTS)
}

async fn operator_performance(
    State(state): State<AppState>,
    Query(range): Query<DateRange>,
) -> Result<impl IntoResponse, ApiError> {
    let chart = state
        .services
        .reports
        .operator_performance(&range)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(chart))
}

async fn stage_duration(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chart = state
        .services
        .reports
        .stage_duration()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(chart))
}

async fn order_completion(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chart = state
        .services
        .reports
        .order_completion()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(chart))
}

async fn defect_analysis(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chart = state
        .services
        .reports
        .defect_analysis()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(chart))
}
