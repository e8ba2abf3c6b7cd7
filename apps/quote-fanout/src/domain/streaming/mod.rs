//! Market Data Streaming Types
//!
//! Core domain types for the quote stream: validated ticker symbols and
//! the normalized quote snapshot produced by a quote provider. Quotes are
//! forwarded to subscribers as-is and never cached by the fan-out core.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 20;

// =============================================================================
// Symbol
// =============================================================================

/// A normalized ticker symbol (trimmed, upper-cased).
///
/// Accepts ASCII letters and digits plus `. : _ ^ = -`, which covers plain
/// tickers (`AAPL`), share classes (`BRK.B`), indices (`^GSPC`) and
/// exchange-prefixed symbols (`BINANCE:BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the symbol is empty, too long, or contains
    /// characters outside the accepted set.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong {
                len: normalized.len(),
            });
        }

        if let Some(c) = normalized.chars().find(|c| !is_symbol_char(*c)) {
            return Err(SymbolError::InvalidCharacter(c));
        }

        Ok(Self(normalized))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | ':' | '_' | '^' | '=' | '-')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is empty after trimming.
    #[error("symbol must not be empty")]
    Empty,
    /// Symbol exceeds `MAX_SYMBOL_LEN`.
    #[error("symbol is {len} characters long, maximum is {MAX_SYMBOL_LEN}")]
    TooLong {
        /// Length of the rejected symbol.
        len: usize,
    },
    /// Symbol contains a character outside the accepted set.
    #[error("symbol contains invalid character {0:?}")]
    InvalidCharacter(char),
}

// =============================================================================
// Quote
// =============================================================================

/// A single upstream price snapshot for a symbol.
///
/// Prices serialize as JSON numbers and the timestamp as milliseconds
/// since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Quoted symbol.
    pub symbol: Symbol,
    /// Current (last) price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Absolute change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percentage change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Session high.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Session low.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Session open.
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    /// Previous session close.
    #[serde(with = "rust_decimal::serde::float")]
    pub previous_close: Decimal,
    /// Cumulative session volume.
    pub volume: u64,
    /// Time the snapshot was taken.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let symbol = Symbol::parse("  aapl ").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
    }

    #[test]
    fn symbol_accepts_extended_forms() {
        assert!(Symbol::parse("BRK.B").is_ok());
        assert!(Symbol::parse("^GSPC").is_ok());
        assert!(Symbol::parse("binance:btcusdt").is_ok());
    }

    #[test]
    fn symbol_rejects_empty() {
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
    }

    #[test]
    fn symbol_rejects_too_long() {
        let raw = "A".repeat(MAX_SYMBOL_LEN + 1);
        assert_eq!(
            Symbol::parse(&raw),
            Err(SymbolError::TooLong {
                len: MAX_SYMBOL_LEN + 1
            })
        );
    }

    #[test]
    fn symbol_rejects_invalid_characters() {
        assert_eq!(
            Symbol::parse("AA PL"),
            Err(SymbolError::InvalidCharacter(' '))
        );
        assert_eq!(
            Symbol::parse("AAPL;"),
            Err(SymbolError::InvalidCharacter(';'))
        );
    }

    #[test]
    fn symbol_deserialization_validates() {
        let ok: Symbol = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(ok.as_str(), "MSFT");

        let err = serde_json::from_str::<Symbol>("\"\"");
        assert!(err.is_err());
    }

    #[test]
    fn quote_serializes_numbers_and_millis() {
        let quote = Quote {
            symbol: Symbol::parse("AAPL").unwrap(),
            price: Decimal::new(15025, 2),
            change: Decimal::new(125, 2),
            change_percent: Decimal::new(84, 2),
            high: Decimal::new(15100, 2),
            low: Decimal::new(14900, 2),
            open: Decimal::new(14950, 2),
            previous_close: Decimal::new(14900, 2),
            volume: 1_000,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };

        let json = serde_json::to_value(&quote).unwrap();

        assert_eq!(json["symbol"], "AAPL");
        assert!((json["price"].as_f64().unwrap() - 150.25).abs() < 1e-9);
        assert!((json["previousClose"].as_f64().unwrap() - 149.0).abs() < 1e-9);
        assert!((json["changePercent"].as_f64().unwrap() - 0.84).abs() < 1e-9);
        assert_eq!(json["volume"], 1_000);
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
    }
}
