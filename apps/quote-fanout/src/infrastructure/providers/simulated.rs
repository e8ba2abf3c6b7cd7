//! Simulated quote provider.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;

use crate::application::ports::{QuoteProvider, QuoteProviderError};
use crate::domain::streaming::{Quote, Symbol};

/// Largest per-call move, in basis points.
const MAX_STEP_BPS: i64 = 100;

/// Price floor.
const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone)]
struct Session {
    open: Decimal,
    previous_close: Decimal,
    price: Decimal,
    high: Decimal,
    low: Decimal,
    volume: u64,
}

impl Session {
    fn seeded(symbol: &Symbol) -> Self {
        let base = base_price(symbol);
        Self {
            open: base,
            previous_close: base,
            price: base,
            high: base,
            low: base,
            volume: 0,
        }
    }

    /// Advance one step of the walk.
    fn step(&mut self, rng: &mut impl Rng) {
        let bps = rng.random_range(-MAX_STEP_BPS..=MAX_STEP_BPS);
        let factor = Decimal::ONE + Decimal::new(bps, 4);
        self.price = (self.price * factor).round_dp(2).max(MIN_PRICE);
        self.high = self.high.max(self.price);
        self.low = self.low.min(self.price);
        self.volume += rng.random_range(100..=10_000);
    }

    fn to_quote(&self, symbol: &Symbol) -> Quote {
        let change = self.price - self.previous_close;
        let change_percent = (change / self.previous_close * Decimal::ONE_HUNDRED).round_dp(4);

        Quote {
            symbol: symbol.clone(),
            price: self.price,
            change,
            change_percent,
            high: self.high,
            low: self.low,
            open: self.open,
            previous_close: self.previous_close,
            volume: self.volume,
            timestamp: Utc::now(),
        }
    }
}

/// Symbol-derived starting price between 10 and 500.
fn base_price(symbol: &Symbol) -> Decimal {
    let seed: u64 = symbol
        .as_str()
        .bytes()
        .fold(17, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    Decimal::from(10 + seed % 491)
}

/// In-process provider producing a bounded random walk per symbol.
///
/// Never fails. Used for development and as the default provider.
#[derive(Debug, Default)]
pub struct SimulatedQuoteProvider {
    sessions: Mutex<HashMap<Symbol, Session>>,
}

impl SimulatedQuoteProvider {
    /// Create a provider with no symbol history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_quote(&self, symbol: &Symbol) -> Quote {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(symbol.clone())
            .or_insert_with(|| Session::seeded(symbol));
        session.step(&mut rand::rng());
        session.to_quote(symbol)
    }
}

#[async_trait]
impl QuoteProvider for SimulatedQuoteProvider {
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, QuoteProviderError> {
        Ok(self.next_quote(symbol))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
