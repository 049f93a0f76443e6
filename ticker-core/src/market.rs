//! Market data events pushed to subscribers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Symbol;

/// A single price update for one symbol.
///
/// Serializes to the outbound push shape `{symbol, price, timestamp, ...fields}`:
/// any extra fields the feed supplies (`name`, `change`, `changePercent`, ...)
/// are flattened into the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: Symbol,
    pub price: Decimal,
    /// Feeds that omit a timestamp are stamped on arrival
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MarketEvent {
    /// Create an event stamped with the current time and no extra fields
    pub fn new(symbol: Symbol, price: Decimal) -> Self {
        Self {
            symbol,
            price,
            timestamp: Utc::now(),
            fields: Map::new(),
        }
    }

    /// Attach an extra field to the pushed payload
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
