//! Connection registry for WebSocket clients
//!
//! Tracks live connections, the symbols each one is subscribed to, and the
//! inverse symbol -> connections index used for routing.
//!
//! Both maps live behind a single mutex so that every observer sees them as
//! exact inverses of each other: a connection C is in the index entry for `s`
//! if and only if `s` is in C's subscription set. Nothing under the lock does
//! I/O; delivery handles are cloned out (copy-on-read) and written to after
//! the lock is released.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use ticker_core::{ConnectionId, Symbol, TickerError, TickerResult};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

/// A pre-serialized message queued for one connection
pub type Outbound = Arc<str>;

/// Delivery side of one client connection.
///
/// The receiving end of `outbound` is owned by the connection's session, which
/// is the only code that touches the client transport.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    /// Cleared (under the registry lock) when the connection is unregistered
    live: AtomicBool,
    close_requested: AtomicBool,
    close_signal: Notify,
    consecutive_failures: AtomicU32,
}

impl ConnectionHandle {
    fn new(id: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            outbound,
            live: AtomicBool::new(true),
            close_requested: AtomicBool::new(false),
            close_signal: Notify::new(),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// False once the connection has been unregistered
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Outbound> {
        &self.outbound
    }

    /// Ask the owning session to tear the connection down.
    ///
    /// Only signals; the session observes it on its next poll and performs the
    /// actual unregister itself.
    pub fn request_close(&self) {
        if !self.close_requested.swap(true, Ordering::AcqRel) {
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Resolves once [`request_close`](Self::request_close) has been called
    pub async fn closed(&self) {
        loop {
            let notified = self.close_signal.notified();
            if self.is_close_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Returns the new consecutive failure count
    pub(crate) fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }
}

struct ConnectionEntry {
    handle: Arc<ConnectionHandle>,
    symbols: HashSet<Symbol>,
}

#[derive(Default)]
struct RegistryState {
    /// Connection ID -> handle and subscription set
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Symbol -> subscribed connection IDs. Entries are never left empty.
    symbol_index: HashMap<Symbol, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn detach(&mut self, id: ConnectionId, symbol: &Symbol) {
        if let Some(ids) = self.symbol_index.get_mut(symbol) {
            ids.remove(&id);
            if ids.is_empty() {
                self.symbol_index.remove(symbol);
            }
        }
    }
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub symbols: usize,
    pub subscriptions: usize,
}

/// Owns the set of live connections and their symbol subscriptions
pub struct ConnectionRegistry {
    /// Next connection ID to assign
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Register a new connection with an empty subscription set.
    ///
    /// `outbound` is where routed events for this connection are queued. Never
    /// fails; the returned handle carries the assigned [`ConnectionId`].
    pub fn register(&self, outbound: mpsc::Sender<Outbound>) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle::new(id, outbound));

        self.state.lock().connections.insert(
            id,
            ConnectionEntry {
                handle: Arc::clone(&handle),
                symbols: HashSet::new(),
            },
        );

        info!("Connection {} registered", id);
        handle
    }

    /// Remove a connection from every index entry and drop its subscriptions.
    ///
    /// Idempotent: returns `false` (and does nothing) if the connection is not
    /// registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let Some(entry) = state.connections.remove(&id) else {
                return false;
            };
            for symbol in &entry.symbols {
                state.detach(id, symbol);
            }
            entry.handle.live.store(false, Ordering::Release);
            entry
        };

        // An external unregister must also stop the session that owns the transport
        entry.handle.request_close();

        info!(
            "Connection {} unregistered, removed {} subscriptions",
            id,
            entry.symbols.len()
        );
        true
    }

    /// Subscribe a connection to a symbol.
    ///
    /// Returns `true` if the subscription is new, `false` if it already existed.
    pub fn subscribe(&self, id: ConnectionId, symbol: &Symbol) -> TickerResult<bool> {
        let added = {
            let mut state = self.state.lock();
            let entry = state
                .connections
                .get_mut(&id)
                .ok_or(TickerError::UnknownConnection(id))?;

            let added = entry.symbols.insert(symbol.clone());
            if added {
                state
                    .symbol_index
                    .entry(symbol.clone())
                    .or_default()
                    .insert(id);
            }
            added
        };

        debug!("Connection {} subscribed to {} (new: {})", id, symbol, added);
        Ok(added)
    }

    /// Unsubscribe a connection from a symbol.
    ///
    /// Not being subscribed is a no-op that returns `false`.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &Symbol) -> TickerResult<bool> {
        let removed = {
            let mut state = self.state.lock();
            let entry = state
                .connections
                .get_mut(&id)
                .ok_or(TickerError::UnknownConnection(id))?;

            let removed = entry.symbols.remove(symbol);
            if removed {
                state.detach(id, symbol);
            }
            removed
        };

        debug!("Connection {} unsubscribed from {} (was subscribed: {})", id, symbol, removed);
        Ok(removed)
    }

    /// Snapshot the connections currently subscribed to `symbol`.
    ///
    /// The returned handles are owned copies: a later unregister cannot
    /// invalidate them, it only marks them not-live.
    pub fn subscribers_of(&self, symbol: &Symbol) -> Vec<Arc<ConnectionHandle>> {
        let state = self.state.lock();
        let Some(ids) = state.symbol_index.get(symbol) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.connections.get(id))
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// Symbols a connection is subscribed to, or `None` if it is not registered
    pub fn subscriptions_of(&self, id: ConnectionId) -> Option<HashSet<Symbol>> {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.symbols.clone())
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.lock().connections.contains_key(&id)
    }

    /// Get the number of subscribers for a symbol
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        self.state
            .lock()
            .symbol_index
            .get(symbol)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Get total number of registered connections
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            connections: state.connections.len(),
            symbols: state.symbol_index.len(),
            subscriptions: state.symbol_index.values().map(|ids| ids.len()).sum(),
        }
    }

    /// Ask every live connection to close (service stop).
    ///
    /// Sessions unregister themselves as they wind down.
    pub fn shutdown(&self) {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .state
            .lock()
            .connections
            .values()
            .map(|entry| Arc::clone(&entry.handle))
            .collect();

        info!("Shutting down registry, closing {} connections", handles.len());
        for handle in handles {
            handle.request_close();
        }
    }

    /// Check that the subscription sets and the symbol index are exact inverses
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();

        let forward_ok = state.connections.iter().all(|(id, entry)| {
            entry.symbols.iter().all(|symbol| {
                state
                    .symbol_index
                    .get(symbol)
                    .is_some_and(|ids| ids.contains(id))
            })
        });

        let inverse_ok = state.symbol_index.iter().all(|(symbol, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    state
                        .connections
                        .get(id)
                        .is_some_and(|entry| entry.symbols.contains(symbol))
                })
        });

        forward_ok && inverse_ok
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &stats.connections)
            .field("symbols", &stats.symbols)
            .finish()
    }
}
