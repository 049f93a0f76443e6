//! Services for the stock ticker alerts backend
//!
//! This crate holds the subscription and fan-out engine (connection registry,
//! broadcast router, per-connection sessions), the market feed pump, and the
//! alert/watchlist stores.

pub mod feed;
pub mod stores;
pub mod websocket;

pub use feed::{FeedHealth, MarketFeed};
pub use stores::{AlertStore, InMemoryAlertStore, InMemoryWatchlistStore, WatchlistStore};
pub use websocket::{
    BroadcastRouter, ChannelSocket, ClientEnd, CloseReason, ConnectionHandle,
    ConnectionRegistry, DeliveryReport, Outbound, RegistryStats, RouterConfig, SessionConfig,
    SessionOutcome, SessionPhase, WebSocketState,
};
