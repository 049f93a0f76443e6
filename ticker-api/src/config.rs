//! Server configuration loaded from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;
use ticker_core::TickerError;
use ticker_services::websocket::{
    DEFAULT_DELIVERY_TIMEOUT_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_OUTBOUND_QUEUE_SIZE,
};
use ticker_services::{RouterConfig, SessionConfig};

/// Runtime settings for the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP listen port
    pub port: u16,
    /// Per-subscriber delivery bound in milliseconds
    pub delivery_timeout_ms: u64,
    /// Routed events buffered per connection
    pub outbound_queue_size: usize,
    /// Consecutive failed deliveries before a connection is evicted (0 = never)
    pub evict_after_failures: u32,
    /// Market events buffered between ingest and routing
    pub event_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            evict_after_failures: DEFAULT_FAILURE_THRESHOLD,
            event_queue_size: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    ///
    /// Reads:
    /// - SERVER_PORT
    /// - DELIVERY_TIMEOUT_MS
    /// - OUTBOUND_QUEUE_SIZE
    /// - EVICT_AFTER_FAILURES
    /// - EVENT_QUEUE_SIZE
    pub fn from_env() -> Result<Self, TickerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TickerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            port: parse_var(&lookup, "SERVER_PORT", defaults.port)?,
            delivery_timeout_ms: parse_var(&lookup, "DELIVERY_TIMEOUT_MS", defaults.delivery_timeout_ms)?,
            outbound_queue_size: parse_var(&lookup, "OUTBOUND_QUEUE_SIZE", defaults.outbound_queue_size)?,
            evict_after_failures: parse_var(&lookup, "EVICT_AFTER_FAILURES", defaults.evict_after_failures)?,
            event_queue_size: parse_var(&lookup, "EVENT_QUEUE_SIZE", defaults.event_queue_size)?,
        };

        if config.delivery_timeout_ms == 0 {
            return Err(TickerError::config("DELIVERY_TIMEOUT_MS must be greater than 0"));
        }
        if config.outbound_queue_size == 0 || config.event_queue_size == 0 {
            return Err(TickerError::config("queue sizes must be greater than 0"));
        }

        Ok(config)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            failure_threshold: self.evict_after_failures,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_queue_size: self.outbound_queue_size,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, TickerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TickerError::config(format!("invalid {}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
