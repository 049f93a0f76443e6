//! Stock Ticker Alerts API Server
//!
//! Streams price updates to WebSocket subscribers and serves the alert and
//! watchlist endpoints.

mod config;
mod metrics;
mod routes;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::MarketEvent;
use ticker_services::{
    AlertStore, BroadcastRouter, ConnectionRegistry, InMemoryAlertStore, InMemoryWatchlistStore,
    MarketFeed, WatchlistStore, WebSocketState,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ServerConfig;

/// How long the feed pump may take to drain after the server stops
const FEED_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub ws_state: Arc<WebSocketState>,
    pub feed: Arc<MarketFeed>,
    /// Ingested market events waiting to be routed
    pub event_tx: mpsc::Sender<MarketEvent>,
    pub alerts: Arc<dyn AlertStore>,
    pub watchlists: Arc<dyn WatchlistStore>,
    /// Renders the router's delivery counters
    pub metrics: PrometheusHandle,
}

/// Build the HTTP router
pub fn app(state: AppState) -> Router {
    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(routes::USER_ID_HEADER),
        ]);

    Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::ws_routes())
        .merge(metrics::routes())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ticker_api=debug,ticker_services=debug")),
        )
        .init();

    info!("Starting Stock Ticker Alerts API");

    let config = ServerConfig::from_env()?;
    info!("Configuration: {:?}", config);

    let metrics = metrics::install_recorder()?;

    // Connection registry lives for the lifetime of the server
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(BroadcastRouter::new(
        Arc::clone(&registry),
        config.router_config(),
    ));

    let alerts: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
    let watchlists: Arc<dyn WatchlistStore> = Arc::new(InMemoryWatchlistStore::new());

    let ws_state = Arc::new(
        WebSocketState::new(Arc::clone(&registry), config.session_config())
            .with_watchlists(Arc::clone(&watchlists)),
    );

    // Start the feed pump; it stops once every event sender is dropped
    let feed = Arc::new(MarketFeed::new(router));
    let (event_tx, event_rx) = mpsc::channel::<MarketEvent>(config.event_queue_size);
    let feed_for_pump = Arc::clone(&feed);
    let feed_task = tokio::spawn(async move {
        feed_for_pump.run(ReceiverStream::new(event_rx)).await;
    });

    // Create app state
    let state = AppState {
        registry: Arc::clone(&registry),
        ws_state,
        feed,
        event_tx,
        alerts,
        watchlists,
        metrics,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let registry_for_shutdown = Arc::clone(&registry);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            registry_for_shutdown.shutdown();
        })
        .await?;

    // Server state (and with it the event sender) is gone; let the pump drain
    if tokio::time::timeout(FEED_DRAIN_TIMEOUT, feed_task).await.is_err() {
        tracing::warn!("Market feed did not drain in time");
    }
    registry.shutdown();
    info!("Server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> (AppState, mpsc::Receiver<MarketEvent>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(
            Arc::clone(&registry),
            Default::default(),
        ));
        let (event_tx, event_rx) = mpsc::channel(4);
        let state = AppState {
            registry: Arc::clone(&registry),
            ws_state: Arc::new(WebSocketState::new(registry, Default::default())),
            feed: Arc::new(MarketFeed::new(router)),
            event_tx,
            alerts: Arc::new(InMemoryAlertStore::new()),
            watchlists: Arc::new(InMemoryWatchlistStore::new()),
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        };
        (state, event_rx)
    }

    fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_event_ingest_is_queued() {
        let (state, mut event_rx) = test_state();
        let response = app(state)
            .oneshot(request(
                Method::POST,
                "/api/events",
                None,
                Some(json!({"symbol": "aapl", "price": 150})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let event = event_rx.try_recv().unwrap();
        assert_eq!(event.symbol.as_str(), "AAPL");
    }

    #[tokio::test]
    async fn test_alert_routes_require_identity() {
        let (state, _rx) = test_state();
        let response = app(state)
            .oneshot(request(Method::GET, "/api/alerts", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_and_list_alerts() {
        let (state, _rx) = test_state();
        let app = app(state);

        let created = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/alerts",
                Some("alice"),
                Some(json!({"symbol": "tsla", "targetPrice": 300, "condition": "below"})),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = json_body(created).await;
        assert_eq!(created["symbol"], "TSLA");
        assert_eq!(created["isActive"], true);

        let listed = app
            .oneshot(request(Method::GET, "/api/alerts", Some("alice"), None))
            .await
            .unwrap();
        assert_eq!(json_body(listed).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_stock_to_watchlist() {
        let (state, _rx) = test_state();
        let app = app(state);

        let created = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/watchlists",
                Some("alice"),
                Some(json!({"name": "Tech"})),
            ))
            .await
            .unwrap();
        let id = json_body(created).await["id"].as_str().unwrap().to_string();

        let added = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/watchlists/{}/stocks?symbol=nvda", id),
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(added.status(), StatusCode::OK);
        assert_eq!(json_body(added).await["watchlist"]["symbols"], json!(["NVDA"]));

        let missing = app
            .oneshot(request(
                Method::POST,
                "/api/watchlists/watchlist-404/stocks?symbol=nvda",
                Some("alice"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_registry() {
        let (state, _rx) = test_state();
        let response = app(state)
            .oneshot(request(Method::GET, "/api/health", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"]["connections"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() {
        let (state, _rx) = test_state();
        let response = app(state)
            .oneshot(request(Method::GET, "/metrics", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
