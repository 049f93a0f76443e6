//! Watchlist endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use ticker_core::{Symbol, Watchlist};
use tracing::info;

use super::{error_response, UserId};
use crate::AppState;

/// Request body for creating a watchlist
#[derive(Debug, Deserialize)]
pub struct CreateWatchlistRequest {
    pub name: String,
}

/// Query parameters for adding a stock
#[derive(Debug, Deserialize)]
pub struct AddStockQuery {
    pub symbol: String,
}

/// Response after changing a watchlist's stocks
#[derive(Debug, Serialize)]
pub struct WatchlistUpdateResponse {
    pub message: String,
    pub watchlist: Watchlist,
}

/// Create watchlist routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/watchlists", get(list_watchlists).post(create_watchlist))
        .route("/watchlists/{id}/stocks", post(add_stock))
        .route("/watchlists/{id}/stocks/{symbol}", delete(remove_stock))
}

async fn create_watchlist(
    State(state): State<AppState>,
    UserId(user): UserId,
    Json(request): Json<CreateWatchlistRequest>,
) -> impl IntoResponse {
    let name = request.name.trim();
    if name.is_empty() {
        return error_response(ticker_core::TickerError::invalid_command(
            "watchlist name must not be empty",
        ));
    }

    match state.watchlists.create(&user, name).await {
        Ok(list) => (StatusCode::CREATED, Json(list)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_watchlists(
    State(state): State<AppState>,
    UserId(user): UserId,
) -> impl IntoResponse {
    match state.watchlists.list_for_owner(&user).await {
        Ok(lists) => Json(lists).into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_stock(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    Query(query): Query<AddStockQuery>,
) -> impl IntoResponse {
    let symbol = match Symbol::parse(&query.symbol) {
        Ok(symbol) => symbol,
        Err(e) => return error_response(e),
    };
    info!("Adding {} to watchlist {} for {}", symbol, id, user);

    match state.watchlists.add_symbol(&user, &id, symbol).await {
        Ok(watchlist) => Json(WatchlistUpdateResponse {
            message: "Stock added to watchlist".to_string(),
            watchlist,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_stock(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path((id, symbol)): Path<(String, String)>,
) -> impl IntoResponse {
    let symbol = match Symbol::parse(&symbol) {
        Ok(symbol) => symbol,
        Err(e) => return error_response(e),
    };

    match state.watchlists.remove_symbol(&user, &id, &symbol).await {
        Ok(watchlist) => Json(WatchlistUpdateResponse {
            message: "Stock removed from watchlist".to_string(),
            watchlist,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}
