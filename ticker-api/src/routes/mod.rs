//! API route definitions

mod alerts;
mod auth;
mod events;
mod health;
mod watchlists;
pub mod ws;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;
use ticker_core::TickerError;

use crate::AppState;

pub use auth::{UserId, USER_ID_HEADER};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Map a ticker error onto an HTTP response
pub fn error_response(err: TickerError) -> Response {
    let status = match &err {
        TickerError::NotFound(_) | TickerError::UnknownConnection(_) => StatusCode::NOT_FOUND,
        TickerError::InvalidSymbol(_) | TickerError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        TickerError::Transport { .. } | TickerError::Timeout { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TickerError::Serialization(_) | TickerError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(events::routes())
        .merge(alerts::routes())
        .merge(watchlists::routes())
}

/// Create WebSocket routes (separate from API)
pub fn ws_routes() -> Router<AppState> {
    ws::routes()
}
