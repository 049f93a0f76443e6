//! Broadcast router: market event -> subscribed connections fan-out
//!
//! Looks up the subscribers of an event's symbol, serializes the event once,
//! and queues it on every subscriber concurrently. Each queue attempt is
//! bounded by a timeout, so a stalled client costs at most one timeout and
//! never holds up the others.

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::{MarketEvent, TickerError};
use tracing::{debug, warn};

use super::registry::{ConnectionHandle, ConnectionRegistry, Outbound};

/// Default bound on a single subscriber's queue attempt
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 250;

/// Default number of consecutive failed deliveries before a connection is evicted
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Configuration for the broadcast router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long to wait on one subscriber's full queue before giving up
    pub delivery_timeout: Duration,
    /// Consecutive failures after which the connection's session is asked to close.
    /// Zero disables eviction.
    pub failure_threshold: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Outcome counts of a single [`BroadcastRouter::route`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Event queued for the connection
    pub delivered: usize,
    /// Connection was already gone or is being torn down
    pub skipped: usize,
    /// Queue stayed full past the timeout, or the payload could not be built
    pub failed: usize,
}

impl DeliveryReport {
    pub fn total(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &Delivery) {
        match outcome {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug)]
enum Delivery {
    Delivered,
    Skipped,
    Failed,
}

/// Routes market events to the connections subscribed to their symbol
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    config: RouterConfig,
}

impl BroadcastRouter {
    /// Create a new broadcast router
    pub fn new(registry: Arc<ConnectionRegistry>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Deliver an event to every connection subscribed to its symbol.
    ///
    /// Never fails: per-subscriber problems are counted in the report. A
    /// subscribe or unsubscribe that completed before this call is always
    /// observed; one that races with it may or may not see this event.
    /// Events for one symbol reach each connection's queue in the order
    /// `route` was called, as long as calls are not issued concurrently.
    pub async fn route(&self, event: &MarketEvent) -> DeliveryReport {
        counter!("ticker_events_routed_total").increment(1);

        let subscribers = self.registry.subscribers_of(&event.symbol);
        if subscribers.is_empty() {
            debug!("No connections subscribed to {}", event.symbol);
            return DeliveryReport::default();
        }

        self.deliver(&subscribers, event).await
    }

    /// Fan an event out to an explicit subscriber snapshot
    pub async fn deliver(
        &self,
        subscribers: &[Arc<ConnectionHandle>],
        event: &MarketEvent,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        // Pre-serialize once
        let payload: Outbound = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!("Failed to serialize event for {}: {}", event.symbol, e);
                report.failed = subscribers.len();
                counter!("ticker_deliveries_failed_total").increment(report.failed as u64);
                return report;
            }
        };

        let outcomes = join_all(
            subscribers
                .iter()
                .map(|handle| self.deliver_one(handle, Arc::clone(&payload))),
        )
        .await;

        for outcome in &outcomes {
            report.record(outcome);
        }

        counter!("ticker_deliveries_total").increment(report.delivered as u64);
        counter!("ticker_deliveries_skipped_total").increment(report.skipped as u64);
        counter!("ticker_deliveries_failed_total").increment(report.failed as u64);

        debug!(
            "Routed {} to {} connections ({} delivered, {} skipped, {} failed)",
            event.symbol,
            report.total(),
            report.delivered,
            report.skipped,
            report.failed
        );

        report
    }

    async fn deliver_one(&self, handle: &ConnectionHandle, payload: Outbound) -> Delivery {
        // An evicted connection must not cost another timeout while its session winds down
        if !handle.is_live() || handle.is_close_requested() {
            return Delivery::Skipped;
        }

        let outcome =
            match tokio::time::timeout(self.config.delivery_timeout, handle.outbound().send(payload))
                .await
            {
                Ok(Ok(())) => {
                    handle.record_success();
                    return Delivery::Delivered;
                }
                // Session already dropped its queue
                Ok(Err(_)) => return Delivery::Skipped,
                Err(_) => TickerError::Timeout {
                    connection: handle.id(),
                    elapsed: self.config.delivery_timeout,
                },
            };

        warn!("Delivery failed: {}", outcome);
        self.note_failure(handle);
        Delivery::Failed
    }

    fn note_failure(&self, handle: &ConnectionHandle) {
        let failures = handle.record_failure();
        if self.config.failure_threshold > 0 && failures >= self.config.failure_threshold {
            warn!(
                "Evicting slow connection {} after {} consecutive failed deliveries",
                handle.id(),
                failures
            );
            counter!("ticker_connections_evicted_total").increment(1);
            handle.request_close();
        }
    }
}

impl std::fmt::Debug for BroadcastRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRouter")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use ticker_core::Symbol;
    use tokio::sync::mpsc;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn router(registry: &Arc<ConnectionRegistry>) -> BroadcastRouter {
        BroadcastRouter::new(
            Arc::clone(registry),
            RouterConfig {
                delivery_timeout: Duration::from_millis(50),
                failure_threshold: 2,
            },
        )
    }

    fn connect(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (registry.register(tx), rx)
    }

    fn decode(payload: &Outbound) -> MarketEvent {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn test_route_to_subscriber_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, mut rx) = connect(&registry, 8);
        registry.subscribe(a.id(), &sym("AAPL")).unwrap();

        let report = router.route(&MarketEvent::new(sym("AAPL"), dec!(150))).await;
        assert_eq!(report, DeliveryReport { delivered: 1, skipped: 0, failed: 0 });

        let report = router.route(&MarketEvent::new(sym("MSFT"), dec!(410))).await;
        assert_eq!(report, DeliveryReport::default());

        let msg = rx.try_recv().unwrap();
        assert_eq!(decode(&msg).price, dec!(150));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_isolated() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, mut rx_a) = connect(&registry, 8);
        let (b, _rx_b) = connect(&registry, 1);
        let (c, mut rx_c) = connect(&registry, 8);
        for handle in [&a, &b, &c] {
            registry.subscribe(handle.id(), &sym("TSLA")).unwrap();
        }

        // Fill B's queue so the next send blocks until the timeout
        b.outbound().try_send(Arc::from("stale")).unwrap();

        let report = router.route(&MarketEvent::new(sym("TSLA"), dec!(250))).await;

        assert_eq!(report, DeliveryReport { delivered: 2, skipped: 0, failed: 1 });
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_repeated_failures_request_close() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (b, _rx_b) = connect(&registry, 1);
        registry.subscribe(b.id(), &sym("TSLA")).unwrap();
        b.outbound().try_send(Arc::from("stale")).unwrap();

        router.route(&MarketEvent::new(sym("TSLA"), dec!(1))).await;
        assert!(!b.is_close_requested());

        router.route(&MarketEvent::new(sym("TSLA"), dec!(2))).await;
        assert!(b.is_close_requested());
        // Eviction only signals; the session performs the unregister
        assert!(registry.is_registered(b.id()));
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_dropped_from_routing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, mut rx_a) = connect(&registry, 8);
        let (b, mut rx_b) = connect(&registry, 8);
        registry.subscribe(a.id(), &sym("TSLA")).unwrap();
        registry.subscribe(b.id(), &sym("TSLA")).unwrap();

        let first = router.route(&MarketEvent::new(sym("TSLA"), dec!(200))).await;
        assert_eq!(first.delivered, 2);

        registry.unregister(a.id());

        let second = router.route(&MarketEvent::new(sym("TSLA"), dec!(201))).await;
        assert_eq!(second, DeliveryReport { delivered: 1, skipped: 0, failed: 0 });

        assert_eq!(decode(&rx_b.try_recv().unwrap()).price, dec!(200));
        assert_eq!(decode(&rx_b.try_recv().unwrap()).price, dec!(201));
        assert_eq!(decode(&rx_a.try_recv().unwrap()).price, dec!(200));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_taken_before_unregister_counts_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, _rx_a) = connect(&registry, 8);
        let (b, mut rx_b) = connect(&registry, 8);
        registry.subscribe(a.id(), &sym("TSLA")).unwrap();
        registry.subscribe(b.id(), &sym("TSLA")).unwrap();

        let snapshot = registry.subscribers_of(&sym("TSLA"));
        registry.unregister(a.id());

        let report = router
            .deliver(&snapshot, &MarketEvent::new(sym("TSLA"), dec!(199)))
            .await;

        assert_eq!(report, DeliveryReport { delivered: 1, skipped: 1, failed: 0 });
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_queue_counts_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, rx_a) = connect(&registry, 8);
        registry.subscribe(a.id(), &sym("IBM")).unwrap();
        drop(rx_a);

        let report = router.route(&MarketEvent::new(sym("IBM"), dec!(180))).await;
        assert_eq!(report, DeliveryReport { delivered: 0, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_route_order_preserved_per_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, mut rx) = connect(&registry, 64);
        registry.subscribe(a.id(), &sym("NVDA")).unwrap();

        for i in 0..20 {
            router
                .route(&MarketEvent::new(sym("NVDA"), rust_decimal::Decimal::from(i)))
                .await;
        }

        for i in 0..20 {
            let event = decode(&rx.try_recv().unwrap());
            assert_eq!(event.price, rust_decimal::Decimal::from(i));
        }
    }

    #[tokio::test]
    async fn test_evicted_connection_is_skipped_without_waiting() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (stalled, _rx_stalled) = connect(&registry, 1);
        let (healthy, mut rx_healthy) = connect(&registry, 8);
        for handle in [&stalled, &healthy] {
            registry.subscribe(handle.id(), &sym("AMD")).unwrap();
        }
        stalled.outbound().try_send(Arc::from("stale")).unwrap();

        for i in 0..2 {
            let report = router.route(&MarketEvent::new(sym("AMD"), Decimal::from(i))).await;
            assert_eq!(report, DeliveryReport { delivered: 1, skipped: 0, failed: 1 });
        }
        assert!(stalled.is_close_requested());

        let started = tokio::time::Instant::now();
        let report = router.route(&MarketEvent::new(sym("AMD"), dec!(3))).await;
        assert_eq!(report, DeliveryReport { delivered: 1, skipped: 1, failed: 0 });
        assert!(started.elapsed() < router.config().delivery_timeout);

        for _ in 0..3 {
            assert!(rx_healthy.try_recv().is_ok());
        }
    }

    #[test]
    fn test_delivery_counters_are_recorded() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let router = router(&registry);
        let (a, _rx_a) = connect(&registry, 8);
        let (b, rx_b) = connect(&registry, 8);
        registry.subscribe(a.id(), &sym("ORCL")).unwrap();
        registry.subscribe(b.id(), &sym("ORCL")).unwrap();
        drop(rx_b);

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(router.route(&MarketEvent::new(sym("ORCL"), dec!(120))));
        });

        let rendered = handle.render();
        assert!(rendered.contains("ticker_events_routed_total 1"), "{}", rendered);
        assert!(rendered.contains("ticker_deliveries_total 1"), "{}", rendered);
        assert!(rendered.contains("ticker_deliveries_skipped_total 1"), "{}", rendered);
    }
}
