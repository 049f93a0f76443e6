//! Market data feed pump
//!
//! Drives a stream of market events through the broadcast router one event at
//! a time, which keeps per-symbol delivery order equal to feed order.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ticker_core::MarketEvent;
use tracing::{debug, info};

use crate::websocket::{BroadcastRouter, DeliveryReport};

/// Feed counters (atomic for thread-safe access)
#[derive(Debug, Default)]
struct FeedMetrics {
    events: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    last_event_epoch_ms: AtomicU64,
}

impl FeedMetrics {
    fn record(&self, report: &DeliveryReport) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        self.last_event_epoch_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }
}

/// Totals since the feed started
#[derive(Debug, Clone, Serialize)]
pub struct FeedHealth {
    pub events: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}

/// Routes events from an external market data source
pub struct MarketFeed {
    router: Arc<BroadcastRouter>,
    metrics: FeedMetrics,
}

impl MarketFeed {
    pub fn new(router: Arc<BroadcastRouter>) -> Self {
        Self {
            router,
            metrics: FeedMetrics::default(),
        }
    }

    /// Route every event from `events` until the stream ends
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = MarketEvent>,
    {
        info!("Market feed started");
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            self.route(&event).await;
        }

        info!("Market feed stopped");
    }

    /// Route a single event and record its outcome
    pub async fn route(&self, event: &MarketEvent) -> DeliveryReport {
        let report = self.router.route(event).await;
        self.metrics.record(&report);
        debug!("Feed event {} @ {}: {:?}", event.symbol, event.price, report);
        report
    }

    pub fn health(&self) -> FeedHealth {
        let last_ms = self.metrics.last_event_epoch_ms.load(Ordering::Relaxed);
        FeedHealth {
            events: self.metrics.events.load(Ordering::Relaxed),
            delivered: self.metrics.delivered.load(Ordering::Relaxed),
            skipped: self.metrics.skipped.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            last_event_time: if last_ms > 0 {
                DateTime::from_timestamp_millis(last_ms as i64)
            } else {
                None
            },
        }
    }
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("health", &self.health())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{ConnectionRegistry, RouterConfig};
    use rust_decimal::Decimal;
    use ticker_core::Symbol;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_feed_routes_in_order_and_counts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(
            Arc::clone(&registry),
            RouterConfig::default(),
        ));
        let feed = MarketFeed::new(router);

        let (tx, mut rx) = mpsc::channel(16);
        let handle = registry.register(tx);
        let aapl = Symbol::parse("AAPL").unwrap();
        registry.subscribe(handle.id(), &aapl).unwrap();

        let events = (1..=5).map(|i| MarketEvent::new(aapl.clone(), Decimal::from(i)));
        let msft = MarketEvent::new(Symbol::parse("MSFT").unwrap(), Decimal::ONE);
        feed.run(futures::stream::iter(events.chain(std::iter::once(msft))))
            .await;

        for i in 1..=5 {
            let event: MarketEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(event.price, Decimal::from(i));
        }
        assert!(rx.try_recv().is_err());

        let health = feed.health();
        assert_eq!(health.events, 6);
        assert_eq!(health.delivered, 5);
        assert!(health.last_event_time.is_some());
    }
}
