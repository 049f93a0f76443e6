//! Core types for the stock ticker alerts backend
//!
//! This crate defines the shared data structures used across the backend:
//! symbols, market events, the WebSocket protocol, and alert/watchlist records.

pub mod alert;
pub mod error;
pub mod market;
pub mod symbol;
pub mod websocket;

pub use alert::{AlertCondition, NewAlert, PriceAlert, Watchlist};
pub use error::{TickerError, TickerResult};
pub use market::MarketEvent;
pub use symbol::Symbol;
pub use websocket::{ClientCommand, CommandRejection, ConnectionId, ErrorCode, ServerMessage};
