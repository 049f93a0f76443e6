//! Market event ingest
//!
//! The external market data feed pushes events here; they are queued for the
//! feed pump, which routes them in arrival order.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Serialize;
use ticker_core::MarketEvent;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::ErrorResponse;
use crate::AppState;

#[derive(Debug, Serialize)]
struct QueuedResponse {
    queued: bool,
    subscribers: usize,
}

/// Create event ingest routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", post(ingest_event))
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<MarketEvent>,
) -> impl IntoResponse {
    let subscribers = state.registry.subscriber_count(&event.symbol);
    debug!("Ingesting {} @ {} ({} subscribers)", event.symbol, event.price, subscribers);

    match state.event_tx.try_send(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                queued: true,
                subscribers,
            }),
        )
            .into_response(),
        Err(TrySendError::Full(event)) => {
            warn!("Event queue full, dropping {} update", event.symbol);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "event queue is full".to_string(),
                }),
            )
                .into_response()
        }
        Err(TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "market feed is not running".to_string(),
            }),
        )
            .into_response(),
    }
}
