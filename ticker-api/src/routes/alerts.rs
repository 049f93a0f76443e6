//! Price alert endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use ticker_core::NewAlert;
use tracing::info;

use super::{error_response, UserId};
use crate::AppState;

/// Create alert routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/{id}", delete(delete_alert))
}

async fn create_alert(
    State(state): State<AppState>,
    UserId(user): UserId,
    Json(alert): Json<NewAlert>,
) -> impl IntoResponse {
    info!(
        "Creating alert for {}: {} {} {}",
        user, alert.symbol, alert.condition, alert.target_price
    );

    match state.alerts.create(&user, alert).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_alerts(State(state): State<AppState>, UserId(user): UserId) -> impl IntoResponse {
    match state.alerts.list_for_owner(&user).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_alert(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.alerts.delete(&user, &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
