//! Price-target alerts and watchlists
//!
//! Records only; evaluating whether an alert has triggered is done by an
//! external collaborator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Symbol;

/// Direction of a price target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::Above => write!(f, "above"),
            AlertCondition::Below => write!(f, "below"),
        }
    }
}

/// A user-defined price alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub id: String,
    pub owner: String,
    pub symbol: Symbol,
    pub target_price: Decimal,
    pub condition: AlertCondition,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating an alert
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub symbol: Symbol,
    pub target_price: Decimal,
    pub condition: AlertCondition,
}

/// A named list of symbols belonging to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watchlist {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Insertion-ordered, without duplicates
    pub symbols: Vec<Symbol>,
}

impl Watchlist {
    /// Append a symbol unless it is already present. Returns whether it was added.
    pub fn add_symbol(&mut self, symbol: Symbol) -> bool {
        if self.symbols.contains(&symbol) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    /// Remove a symbol. Returns whether it was present.
    pub fn remove_symbol(&mut self, symbol: &Symbol) -> bool {
        let before = self.symbols.len();
        self.symbols.retain(|s| s != symbol);
        self.symbols.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_new_alert() {
        let json = r#"{"symbol": "aapl", "targetPrice": 200.5, "condition": "above"}"#;
        let alert: NewAlert = serde_json::from_str(json).unwrap();
        assert_eq!(alert.symbol.as_str(), "AAPL");
        assert_eq!(alert.target_price, dec!(200.5));
        assert_eq!(alert.condition, AlertCondition::Above);
    }

    #[test]
    fn test_watchlist_symbols_unique() {
        let mut list = Watchlist {
            id: "w1".to_string(),
            name: "Tech".to_string(),
            owner: "alice".to_string(),
            symbols: Vec::new(),
        };
        let aapl = Symbol::parse("AAPL").unwrap();

        assert!(list.add_symbol(aapl.clone()));
        assert!(!list.add_symbol(aapl.clone()));
        assert_eq!(list.symbols.len(), 1);
        assert!(list.remove_symbol(&aapl));
        assert!(!list.remove_symbol(&aapl));
    }
}
