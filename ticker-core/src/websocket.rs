//! WebSocket message types for symbol subscriptions
//!
//! These types define the protocol between the server and connected clients.
//! Inbound commands are `{"action": ..., "symbol": ...}` objects; market data is
//! pushed as bare [`MarketEvent`](crate::MarketEvent) objects, and control
//! responses carry a `type` tag.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Symbol, TickerError};

// ============================================================================
// Connection identity
// ============================================================================

/// Unique identifier for a client connection, assigned at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// A validated command sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
    /// Keepalive, echoed back as [`ServerMessage::Pong`]
    Ping { timestamp: i64 },
}

/// Loosely-typed inbound frame; every field is optional so that a missing
/// field becomes a descriptive rejection instead of a generic parse error.
#[derive(Debug, Deserialize)]
struct RawCommand {
    action: Option<String>,
    symbol: Option<String>,
    timestamp: Option<i64>,
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRejection {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandRejection {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convert into the response sent back to the offending client
    pub fn into_message(self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code,
            message: self.message,
        }
    }
}

impl From<CommandRejection> for TickerError {
    fn from(rejection: CommandRejection) -> Self {
        match rejection.code {
            ErrorCode::InvalidSymbol => TickerError::InvalidSymbol(rejection.message),
            _ => TickerError::InvalidCommand(rejection.message),
        }
    }
}

impl ClientCommand {
    /// Parse a text frame into a command
    pub fn parse(text: &str) -> Result<Self, CommandRejection> {
        let raw: RawCommand = serde_json::from_str(text).map_err(|e| {
            CommandRejection::new(ErrorCode::InvalidMessage, format!("Invalid JSON: {}", e))
        })?;

        let action = raw
            .action
            .ok_or_else(|| CommandRejection::new(ErrorCode::MissingField, "missing 'action'"))?;

        match action.as_str() {
            "subscribe" => Ok(Self::Subscribe(Self::symbol_field(raw.symbol)?)),
            "unsubscribe" => Ok(Self::Unsubscribe(Self::symbol_field(raw.symbol)?)),
            "ping" => Ok(Self::Ping {
                timestamp: raw.timestamp.unwrap_or_default(),
            }),
            other => Err(CommandRejection::new(
                ErrorCode::UnknownAction,
                format!("unknown action '{}'", other),
            )),
        }
    }

    fn symbol_field(symbol: Option<String>) -> Result<Symbol, CommandRejection> {
        let raw = symbol
            .ok_or_else(|| CommandRejection::new(ErrorCode::MissingField, "missing 'symbol'"))?;
        Symbol::parse(&raw)
            .map_err(|e| CommandRejection::new(ErrorCode::InvalidSymbol, e.to_string()))
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Control messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription confirmed
    Subscribed { symbol: Symbol },
    /// Unsubscription confirmed (also sent when there was nothing to remove)
    Unsubscribed { symbol: Symbol },
    /// Pong response to client ping
    Pong {
        /// Echo back client timestamp
        client_timestamp: i64,
        /// Server timestamp
        server_timestamp: i64,
    },
    /// Rejected command
    Error { code: ErrorCode, message: String },
}

/// Error codes for WebSocket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame is not a JSON object or not a text frame
    InvalidMessage,
    /// `action` or `symbol` is missing
    MissingField,
    /// `action` is not one we understand
    UnknownAction,
    /// Symbol failed validation
    InvalidSymbol,
    /// Internal server error
    InternalError,
}
