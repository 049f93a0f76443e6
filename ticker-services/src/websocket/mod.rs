//! WebSocket infrastructure for real-time symbol updates
//!
//! The registry tracks who is subscribed to what, the router fans market
//! events out to subscribers, and a session runs per client connection.

mod registry;
mod router;
mod session;
mod transport;

pub use registry::{ConnectionHandle, ConnectionRegistry, Outbound, RegistryStats};
pub use router::{
    BroadcastRouter, DeliveryReport, RouterConfig, DEFAULT_DELIVERY_TIMEOUT_MS,
    DEFAULT_FAILURE_THRESHOLD,
};
pub use session::{
    CloseReason, SessionConfig, SessionOutcome, SessionPhase, WebSocketState,
    DEFAULT_OUTBOUND_QUEUE_SIZE,
};
pub use transport::{ChannelSocket, ClientEnd};
