//! Error types for the ticker backend

use std::time::Duration;

use thiserror::Error;

use crate::ConnectionId;

/// Ticker-wide error type
#[derive(Error, Debug)]
pub enum TickerError {
    /// The operation referenced a connection that is not registered (never was, or
    /// has already been unregistered). Benign: usually a race with disconnect.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A write to one specific client failed
    #[error("Transport error ({connection}): {message}")]
    Transport {
        connection: ConnectionId,
        message: String,
    },

    /// A bounded wait on a slow subscriber was exceeded
    #[error("Timed out after {elapsed:?} delivering to {connection}")]
    Timeout {
        connection: ConnectionId,
        elapsed: Duration,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TickerError {
    pub fn invalid_symbol(msg: impl Into<String>) -> Self {
        TickerError::InvalidSymbol(msg.into())
    }

    pub fn invalid_command(msg: impl Into<String>) -> Self {
        TickerError::InvalidCommand(msg.into())
    }

    pub fn transport(connection: ConnectionId, message: impl Into<String>) -> Self {
        TickerError::Transport {
            connection,
            message: message.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TickerError::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TickerError::Config(msg.into())
    }

    /// Whether the error only concerns a single connection and can be recovered
    /// from by retrying, ignoring, or tearing that connection down.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            TickerError::UnknownConnection(_)
                | TickerError::Transport { .. }
                | TickerError::Timeout { .. }
        )
    }
}

/// Result type alias for ticker operations
pub type TickerResult<T> = Result<T, TickerError>;
