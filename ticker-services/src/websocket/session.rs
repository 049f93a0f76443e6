//! WebSocket connection session
//!
//! One session per client connection. It turns inbound frames into registry
//! calls, writes routed events and control responses to the transport, and
//! owns the connection's registration for its whole lifetime.

use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::{
    ClientCommand, ConnectionId, ErrorCode, ServerMessage, TickerError, TickerResult,
};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::stores::WatchlistStore;

/// Default capacity of each connection's outbound event queue
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Upper bound on flushing and closing the transport at teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Routed events buffered per connection before the router starts waiting
    pub outbound_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }
}

/// Lifecycle of a session: `Connected -> Closing -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame
    ClientClosed,
    /// Inbound stream ended without a close frame
    StreamEnded,
    /// Reading from or writing to the transport failed
    TransportError(String),
    /// The router or the service asked the connection to close
    CloseRequested,
}

/// Summary returned when a session finishes
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub connection_id: ConnectionId,
    pub reason: CloseReason,
    pub phase: SessionPhase,
}

/// Keeps a connection registered; unregisters on drop, which covers every exit
/// path including cancellation of the session future.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: Arc<ConnectionHandle>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.handle.id());
    }
}

/// What to do after handling one inbound frame
enum FrameAction {
    Reply(ServerMessage),
    Nothing,
    Close,
}

/// Shared state for WebSocket sessions
#[derive(Clone)]
pub struct WebSocketState {
    /// Registry of live connections
    pub registry: Arc<ConnectionRegistry>,
    /// Used to pre-subscribe a known user's watchlist symbols
    watchlists: Option<Arc<dyn WatchlistStore>>,
    config: SessionConfig,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new(registry: Arc<ConnectionRegistry>, config: SessionConfig) -> Self {
        Self {
            registry,
            watchlists: None,
            config,
        }
    }

    /// Set the watchlist store used for pre-seeding subscriptions
    pub fn with_watchlists(mut self, watchlists: Arc<dyn WatchlistStore>) -> Self {
        self.watchlists = Some(watchlists);
        self
    }

    /// Run a session over an established connection until it ends.
    ///
    /// `user` is the identity the caller authenticated, if any.
    pub async fn handle_connection<S>(&self, socket: S, user: Option<String>) -> SessionOutcome
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<Outbound>(self.config.outbound_queue_size.max(1));
        let handle = self.registry.register(outbound_tx);
        let id = handle.id();
        let registration = Registration {
            registry: Arc::clone(&self.registry),
            handle: Arc::clone(&handle),
        };
        let mut phase = SessionPhase::Connected;
        info!("New WebSocket connection: {} (user: {:?})", id, user);

        if let Some(user) = user.as_deref() {
            self.preseed(id, user).await;
        }

        let (mut ws_sender, mut ws_receiver) = socket.split();

        let reason = loop {
            tokio::select! {
                biased;

                _ = handle.closed() => break CloseReason::CloseRequested,

                frame = ws_receiver.next() => match frame {
                    None => break CloseReason::StreamEnded,
                    Some(Err(e)) => break CloseReason::TransportError(e.to_string()),
                    Some(Ok(msg)) => match self.handle_frame(id, msg) {
                        FrameAction::Reply(reply) => {
                            let write = Self::write_message(id, &mut ws_sender, &reply);
                            if let Err(reason) = Self::write_or_close(&handle, write).await {
                                break reason;
                            }
                        }
                        FrameAction::Nothing => {}
                        FrameAction::Close => break CloseReason::ClientClosed,
                    },
                },

                Some(payload) = outbound_rx.recv() => {
                    let write = Self::write_text(id, &mut ws_sender, payload.to_string());
                    if let Err(reason) = Self::write_or_close(&handle, write).await {
                        break reason;
                    }
                }
            }
        };

        // Unregister first so events routed from here on count as skipped
        drop(registration);
        outbound_rx.close();

        Self::transition(id, &mut phase, SessionPhase::Closing);
        match &reason {
            CloseReason::TransportError(e) => warn!("Transport error on {}: {}", id, e),
            other => debug!("Connection {} closing: {:?}", id, other),
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, ws_sender.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing transport for {}: {}", id, e),
            Err(_) => debug!("Transport for {} did not close in time", id),
        }

        Self::transition(id, &mut phase, SessionPhase::Closed);
        info!("WebSocket connection closed: {}", id);

        SessionOutcome {
            connection_id: id,
            reason,
            phase,
        }
    }

    /// Run a transport write, giving up as soon as a close is requested.
    ///
    /// A peer that stops reading can block a write indefinitely.
    async fn write_or_close<F>(handle: &ConnectionHandle, write: F) -> Result<(), CloseReason>
    where
        F: Future<Output = TickerResult<()>>,
    {
        tokio::select! {
            biased;

            _ = handle.closed() => Err(CloseReason::CloseRequested),
            result = write => result.map_err(|e| CloseReason::TransportError(e.to_string())),
        }
    }

    fn transition(id: ConnectionId, phase: &mut SessionPhase, next: SessionPhase) {
        debug!("Connection {}: {:?} -> {:?}", id, phase, next);
        *phase = next;
    }

    /// Subscribe the connection to every symbol on the user's watchlists
    async fn preseed(&self, id: ConnectionId, user: &str) {
        let Some(store) = &self.watchlists else {
            return;
        };

        match store.symbols_for_owner(user).await {
            Ok(symbols) => {
                let mut seeded = 0;
                for symbol in &symbols {
                    match self.registry.subscribe(id, symbol) {
                        Ok(_) => seeded += 1,
                        Err(e) => warn!("Failed to pre-seed {} for {}: {}", symbol, id, e),
                    }
                }
                debug!("Pre-seeded {} watchlist symbols for {} ({})", seeded, id, user);
            }
            Err(e) => warn!("Failed to load watchlists for {}: {}", user, e),
        }
    }

    /// Handle one inbound frame
    fn handle_frame(&self, id: ConnectionId, msg: Message) -> FrameAction {
        match msg {
            Message::Text(text) => match ClientCommand::parse(text.as_str()) {
                Ok(command) => FrameAction::Reply(self.handle_command(id, command)),
                Err(rejection) => {
                    debug!("Rejected command from {}: {}", id, rejection.message);
                    FrameAction::Reply(rejection.into_message())
                }
            },
            Message::Binary(_) => {
                // We don't support binary messages
                FrameAction::Reply(ServerMessage::Error {
                    code: ErrorCode::InvalidMessage,
                    message: "Binary messages not supported".to_string(),
                })
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Control frames are answered by the transport
                debug!("Received ping/pong from {}", id);
                FrameAction::Nothing
            }
            Message::Close(_) => FrameAction::Close,
            Message::Frame(_) => FrameAction::Nothing,
        }
    }

    fn handle_command(&self, id: ConnectionId, command: ClientCommand) -> ServerMessage {
        let result = match command {
            ClientCommand::Subscribe(symbol) => self
                .registry
                .subscribe(id, &symbol)
                .map(|_| ServerMessage::Subscribed { symbol }),
            ClientCommand::Unsubscribe(symbol) => self
                .registry
                .unsubscribe(id, &symbol)
                .map(|_| ServerMessage::Unsubscribed { symbol }),
            ClientCommand::Ping { timestamp } => Ok(ServerMessage::Pong {
                client_timestamp: timestamp,
                server_timestamp: Utc::now().timestamp_millis(),
            }),
        };

        result.unwrap_or_else(|e| {
            // Only reachable if the connection was unregistered underneath us;
            // the close signal will end the session on the next poll.
            warn!("Command from {} failed: {}", id, e);
            ServerMessage::Error {
                code: ErrorCode::InternalError,
                message: e.to_string(),
            }
        })
    }

    async fn write_message<W>(id: ConnectionId, sender: &mut W, message: &ServerMessage) -> TickerResult<()>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let json = serde_json::to_string(message).map_err(|e| {
            error!("Failed to serialize message for {}: {}", id, e);
            TickerError::from(e)
        })?;
        Self::write_text(id, sender, json).await
    }

    async fn write_text<W>(id: ConnectionId, sender: &mut W, text: String) -> TickerResult<()>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        sender
            .send(Message::text(text))
            .await
            .map_err(|e| TickerError::transport(id, e.to_string()))
    }
}

impl std::fmt::Debug for WebSocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketState")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
