//! Alert and watchlist stores
//!
//! The backend only needs narrow interfaces to these records. The in-memory
//! implementations back the API server and tests; a database-backed store can
//! implement the same traits.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use ticker_core::{NewAlert, PriceAlert, Symbol, TickerError, TickerResult, Watchlist};
use tracing::debug;

/// Persistence for user-defined price alerts
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, owner: &str, alert: NewAlert) -> TickerResult<PriceAlert>;

    async fn get(&self, owner: &str, id: &str) -> TickerResult<PriceAlert>;

    async fn list_for_owner(&self, owner: &str) -> TickerResult<Vec<PriceAlert>>;

    async fn delete(&self, owner: &str, id: &str) -> TickerResult<()>;
}

/// Persistence for per-user watchlists
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn create(&self, owner: &str, name: &str) -> TickerResult<Watchlist>;

    async fn get(&self, owner: &str, id: &str) -> TickerResult<Watchlist>;

    async fn list_for_owner(&self, owner: &str) -> TickerResult<Vec<Watchlist>>;

    async fn add_symbol(&self, owner: &str, id: &str, symbol: Symbol) -> TickerResult<Watchlist>;

    async fn remove_symbol(&self, owner: &str, id: &str, symbol: &Symbol)
        -> TickerResult<Watchlist>;

    /// Every symbol across the owner's watchlists, deduplicated
    async fn symbols_for_owner(&self, owner: &str) -> TickerResult<Vec<Symbol>> {
        let mut symbols: Vec<Symbol> = self
            .list_for_owner(owner)
            .await?
            .into_iter()
            .flat_map(|list| list.symbols)
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}

/// In-memory alert store
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    next_id: AtomicU64,
    alerts: RwLock<HashMap<String, PriceAlert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn create(&self, owner: &str, alert: NewAlert) -> TickerResult<PriceAlert> {
        let id = format!("alert-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = PriceAlert {
            id: id.clone(),
            owner: owner.to_string(),
            symbol: alert.symbol,
            target_price: alert.target_price,
            condition: alert.condition,
            is_active: true,
            created_at: Utc::now(),
        };

        debug!(
            "Created alert {} for {}: {} {} {}",
            id, owner, record.symbol, record.condition, record.target_price
        );
        self.alerts.write().insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, owner: &str, id: &str) -> TickerResult<PriceAlert> {
        self.alerts
            .read()
            .get(id)
            .filter(|alert| alert.owner == owner)
            .cloned()
            .ok_or_else(|| TickerError::not_found(format!("alert {}", id)))
    }

    async fn list_for_owner(&self, owner: &str) -> TickerResult<Vec<PriceAlert>> {
        let mut alerts: Vec<PriceAlert> = self
            .alerts
            .read()
            .values()
            .filter(|alert| alert.owner == owner)
            .cloned()
            .collect();
        alerts.sort_by_key(|alert| alert.created_at);
        Ok(alerts)
    }

    async fn delete(&self, owner: &str, id: &str) -> TickerResult<()> {
        let mut alerts = self.alerts.write();
        match alerts.get(id) {
            Some(alert) if alert.owner == owner => {
                alerts.remove(id);
                Ok(())
            }
            _ => Err(TickerError::not_found(format!("alert {}", id))),
        }
    }
}

/// In-memory watchlist store
#[derive(Debug, Default)]
pub struct InMemoryWatchlistStore {
    next_id: AtomicU64,
    /// Keyed by creation sequence, so iteration is creation order
    watchlists: RwLock<BTreeMap<u64, Watchlist>>,
}

const WATCHLIST_ID_PREFIX: &str = "watchlist-";

fn watchlist_sequence(id: &str) -> Option<u64> {
    id.strip_prefix(WATCHLIST_ID_PREFIX)?.parse().ok()
}

impl InMemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the caller's own watchlist
    fn update<F>(&self, owner: &str, id: &str, f: F) -> TickerResult<Watchlist>
    where
        F: FnOnce(&mut Watchlist),
    {
        let mut watchlists = self.watchlists.write();
        let list = watchlist_sequence(id)
            .and_then(|seq| watchlists.get_mut(&seq))
            .filter(|list| list.owner == owner)
            .ok_or_else(|| TickerError::not_found(format!("watchlist {}", id)))?;
        f(list);
        Ok(list.clone())
    }
}

#[async_trait]
impl WatchlistStore for InMemoryWatchlistStore {
    async fn create(&self, owner: &str, name: &str) -> TickerResult<Watchlist> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let list = Watchlist {
            id: format!("{}{}", WATCHLIST_ID_PREFIX, seq),
            name: name.to_string(),
            owner: owner.to_string(),
            symbols: Vec::new(),
        };
        self.watchlists.write().insert(seq, list.clone());
        Ok(list)
    }

    async fn get(&self, owner: &str, id: &str) -> TickerResult<Watchlist> {
        let watchlists = self.watchlists.read();
        watchlist_sequence(id)
            .and_then(|seq| watchlists.get(&seq))
            .filter(|list| list.owner == owner)
            .cloned()
            .ok_or_else(|| TickerError::not_found(format!("watchlist {}", id)))
    }

    async fn list_for_owner(&self, owner: &str) -> TickerResult<Vec<Watchlist>> {
        Ok(self
            .watchlists
            .read()
            .values()
            .filter(|list| list.owner == owner)
            .cloned()
            .collect())
    }

    async fn add_symbol(&self, owner: &str, id: &str, symbol: Symbol) -> TickerResult<Watchlist> {
        self.update(owner, id, |list| {
            list.add_symbol(symbol);
        })
    }

    async fn remove_symbol(
        &self,
        owner: &str,
        id: &str,
        symbol: &Symbol,
    ) -> TickerResult<Watchlist> {
        self.update(owner, id, |list| {
            list.remove_symbol(symbol);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use ticker_core::AlertCondition;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_alerts_are_scoped_to_owner() {
        let store = InMemoryAlertStore::new();
        let alert = store
            .create(
                "alice",
                NewAlert {
                    symbol: sym("AAPL"),
                    target_price: dec!(200),
                    condition: AlertCondition::Above,
                },
            )
            .await
            .unwrap();

        assert!(alert.is_active);
        assert_eq!(store.list_for_owner("alice").await.unwrap().len(), 1);
        assert!(store.list_for_owner("bob").await.unwrap().is_empty());
        assert!(matches!(
            store.delete("bob", &alert.id).await,
            Err(TickerError::NotFound(_))
        ));

        store.delete("alice", &alert.id).await.unwrap();
        assert!(store.get("alice", &alert.id).await.is_err());
    }

    #[tokio::test]
    async fn test_add_to_missing_or_foreign_watchlist() {
        let store = InMemoryWatchlistStore::new();
        let list = store.create("alice", "Tech").await.unwrap();

        assert!(matches!(
            store.add_symbol("alice", "watchlist-404", sym("AAPL")).await,
            Err(TickerError::NotFound(_))
        ));
        assert!(matches!(
            store.add_symbol("bob", &list.id, sym("AAPL")).await,
            Err(TickerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_symbols_for_owner_deduplicates() {
        let store = InMemoryWatchlistStore::new();
        let tech = store.create("alice", "Tech").await.unwrap();
        let cars = store.create("alice", "Cars").await.unwrap();

        store.add_symbol("alice", &tech.id, sym("AAPL")).await.unwrap();
        store.add_symbol("alice", &tech.id, sym("TSLA")).await.unwrap();
        store.add_symbol("alice", &cars.id, sym("tsla")).await.unwrap();

        let symbols = store.symbols_for_owner("alice").await.unwrap();
        assert_eq!(symbols, vec![sym("AAPL"), sym("TSLA")]);
    }

    #[tokio::test]
    async fn test_watchlists_listed_in_creation_order() {
        let store = InMemoryWatchlistStore::new();
        for i in 1..=12 {
            store.create("alice", &format!("List {}", i)).await.unwrap();
        }

        let names: Vec<String> = store
            .list_for_owner("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|list| list.name)
            .collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("List {}", i)).collect();
        assert_eq!(names, expected);
        assert!(store.get("alice", "watchlist-10").await.is_ok());
        assert!(store.get("alice", "not-a-watchlist").await.is_err());
    }
}
