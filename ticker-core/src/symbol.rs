//! Ticker symbols

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;
use std::str::FromStr;

use crate::error::TickerError;

/// Longest accepted ticker, long enough for `EURUSD=X` style FX pairs
pub const MAX_SYMBOL_LEN: usize = 12;

/// A stock ticker identifier, trimmed and uppercase-normalized.
///
/// Two symbols that differ only in case or surrounding whitespace are the same
/// symbol: `" aapl"` and `"AAPL"` parse to equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(SmolStr);

impl Symbol {
    /// Parse and normalize a raw ticker string
    pub fn parse(raw: &str) -> Result<Self, TickerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TickerError::invalid_symbol("symbol is empty"));
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(TickerError::invalid_symbol(format!(
                "'{}' is longer than {} characters",
                trimmed, MAX_SYMBOL_LEN
            )));
        }
        if let Some(bad) = trimmed.chars().find(|c| !is_symbol_char(*c)) {
            return Err(TickerError::invalid_symbol(format!(
                "'{}' contains unsupported character '{}'",
                trimmed, bad
            )));
        }

        Ok(Self(SmolStr::new(trimmed.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = TickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = TickerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0.to_string()
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let a = Symbol::parse(" aapl ").unwrap();
        let b = Symbol::parse("AAPL").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AAPL");
    }

    #[test]
    fn test_accepts_punctuated_tickers() {
        for raw in ["BRK.B", "^GSPC", "EURUSD=X", "RDS-A"] {
            assert!(Symbol::parse(raw).is_ok(), "{} should parse", raw);
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(Symbol::parse(""), Err(TickerError::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse("   "), Err(TickerError::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse("AA PL"), Err(TickerError::InvalidSymbol(_))));
        assert!(matches!(Symbol::parse("$AAPL"), Err(TickerError::InvalidSymbol(_))));
        assert!(matches!(
            Symbol::parse("ABCDEFGHIJKLM"),
            Err(TickerError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_deserialize_normalizes() {
        let symbol: Symbol = serde_json::from_str("\"tsla\"").unwrap();
        assert_eq!(symbol.as_str(), "TSLA");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }
}
