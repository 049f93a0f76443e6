//! WebSocket route handler
//!
//! Handles the WebSocket upgrade and bridges the axum socket onto the
//! session's in-memory transport.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use ticker_services::ChannelSocket;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use crate::AppState;

/// Frames buffered in each direction between the socket and the session
const BRIDGE_BUFFER: usize = 100;

/// How long queued frames may take to flush after the session ends
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters for the WebSocket upgrade
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Authenticated user, used to pre-subscribe watchlist symbols
    pub user: Option<String>,
}

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws/stocks", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    let user = query.user.filter(|u| !u.trim().is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (session_socket, client) = ChannelSocket::pair(BRIDGE_BUFFER);
    let (mut to_session, mut from_session) = (client.tx, client.rx);

    // Task: Forward frames from the axum socket to the session
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let ws_msg = match msg {
                Message::Text(text) => WsMessage::Text(text.to_string().into()),
                Message::Binary(data) => WsMessage::Binary(data.to_vec().into()),
                Message::Ping(data) => WsMessage::Ping(data.to_vec().into()),
                Message::Pong(data) => WsMessage::Pong(data.to_vec().into()),
                Message::Close(_) => WsMessage::Close(None),
            };

            let closing = matches!(ws_msg, WsMessage::Close(_));
            if to_session.send(ws_msg).await.is_err() || closing {
                break;
            }
        }
    });

    // Task: Forward frames written by the session to the axum socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = from_session.next().await {
            let axum_msg = match msg {
                WsMessage::Text(text) => Message::Text(text.to_string().into()),
                WsMessage::Binary(data) => Message::Binary(Bytes::from(data.to_vec())),
                WsMessage::Ping(data) => Message::Ping(Bytes::from(data.to_vec())),
                WsMessage::Pong(data) => Message::Pong(Bytes::from(data.to_vec())),
                WsMessage::Close(_) => break,
                WsMessage::Frame(_) => continue,
            };

            if sender.send(axum_msg).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let outcome = state.ws_state.handle_connection(session_socket, user).await;
    debug!(
        "Session {} ended: {:?}",
        outcome.connection_id, outcome.reason
    );

    // The session closed its side; let queued frames flush, then clean up
    recv_task.abort();
    let drain = send_task.abort_handle();
    if tokio::time::timeout(DRAIN_TIMEOUT, send_task).await.is_err() {
        drain.abort();
    }
}
