//! Quote Pollers
//!
//! One recurring fetch task per symbol with at least one subscriber. The
//! set only tracks cancellation handles; the fan-out service decides when
//! a poller starts or stops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteProvider, QuoteProviderError};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::metrics::{self, ProviderOutcome};

/// Running pollers keyed by symbol.
#[derive(Debug, Default)]
pub struct PollerSet {
    running: HashMap<Symbol, CancellationToken>,
}

impl PollerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly spawned poller.
    ///
    /// Returns `false` (and leaves the existing poller alone) if one is
    /// already running for the symbol.
    pub fn insert(&mut self, symbol: Symbol, cancel: CancellationToken) -> bool {
        if self.running.contains_key(&symbol) {
            return false;
        }
        self.running.insert(symbol, cancel);
        true
    }

    /// Cancel and forget the poller for a symbol.
    ///
    /// Returns `false` if none was running.
    pub fn stop(&mut self, symbol: &Symbol) -> bool {
        match self.running.remove(symbol) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every poller.
    pub fn stop_all(&mut self) {
        for (_, cancel) in self.running.drain() {
            cancel.cancel();
        }
    }

    /// Check whether a poller is running for a symbol.
    #[must_use]
    pub fn is_running(&self, symbol: &Symbol) -> bool {
        self.running.contains_key(symbol)
    }

    /// Symbols with a running poller.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.running.keys().cloned().collect()
    }

    /// Number of running pollers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Check whether no poller is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Poll a symbol until cancelled.
///
/// The first fetch happens immediately, then once per `period`. A fetch
/// still in flight when the poller is cancelled is abandoned. `deliver`
/// receives every result and returns `false` to end the loop.
pub async fn run_poller<F>(
    symbol: Symbol,
    provider: Arc<dyn QuoteProvider>,
    period: Duration,
    cancel: CancellationToken,
    mut deliver: F,
) where
    F: FnMut(&Symbol, Result<Quote, QuoteProviderError>) -> bool + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(symbol = %symbol, period_secs = period.as_secs(), "Poller started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = provider.get_quote(&symbol) => result,
        };

        let outcome = if result.is_ok() {
            ProviderOutcome::Success
        } else {
            ProviderOutcome::Error
        };
        metrics::record_provider_request(outcome, started.elapsed());

        if let Err(ref e) = result {
            tracing::warn!(symbol = %symbol, provider = provider.name(), error = %e, "Quote fetch failed");
        }

        if cancel.is_cancelled() || !deliver(&symbol, result) {
            break;
        }
    }

    tracing::debug!(symbol = %symbol, "Poller exited");
}
