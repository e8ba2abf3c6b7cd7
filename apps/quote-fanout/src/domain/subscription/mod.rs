//! Subscription Tracking
//!
//! Bidirectional index between connections and the symbols they follow.
//!
//! # Design
//!
//! The table tracks:
//! - Which symbols each connection is subscribed to
//! - Which connections follow each symbol, with per-subscription activity
//! - First-subscriber and last-subscriber transitions per symbol
//!
//! Every mutation reports its transitions as `SubscriptionChanges` so the
//! caller can start or stop the single upstream poller for a symbol. The
//! table is not synchronized on its own; the fan-out service owns it
//! behind the same lock as the connection registry and poller set.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Opaque unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Activity bookkeeping for one (symbol, connection) subscription.
#[derive(Debug, Clone, Copy)]
struct SubscriptionEntry {
    subscribed_at: Instant,
    last_delivered_at: Option<Instant>,
}

impl SubscriptionEntry {
    const fn last_activity(&self) -> Instant {
        match self.last_delivered_at {
            Some(at) => at,
            None => self.subscribed_at,
        }
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Poller transitions produced by a table mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols whose subscriber set went from empty to non-empty.
    pub start: HashSet<Symbol>,
    /// Symbols whose subscriber set became empty.
    pub stop: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty()
    }

    /// Create changes with only starts.
    #[must_use]
    pub fn start_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            start: symbols.into_iter().collect(),
            stop: HashSet::new(),
        }
    }

    /// Create changes with only stops.
    #[must_use]
    pub fn stop_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            start: HashSet::new(),
            stop: symbols.into_iter().collect(),
        }
    }

    /// Fold another set of changes into this one.
    ///
    /// A symbol stopped after being started (or the reverse) within the
    /// same batch cancels out, so the net effect matches the final table.
    pub fn merge(&mut self, other: Self) {
        for symbol in other.stop {
            if !self.start.remove(&symbol) {
                self.stop.insert(symbol);
            }
        }
        for symbol in other.start {
            if !self.stop.remove(&symbol) {
                self.start.insert(symbol);
            }
        }
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Tracks which connections follow which symbols.
///
/// # Example
///
/// ```rust
/// use quote_fanout::domain::streaming::Symbol;
/// use quote_fanout::domain::subscription::{ConnectionId, SubscriptionTable};
/// use tokio::time::Instant;
///
/// let mut table = SubscriptionTable::new();
/// let aapl = Symbol::parse("AAPL").unwrap();
/// let (a, b) = (ConnectionId::new(), ConnectionId::new());
///
/// // First subscriber starts the poller
/// let changes = table.subscribe(a, aapl.clone(), Instant::now());
/// assert!(changes.start.contains(&aapl));
///
/// // Second subscriber shares it
/// assert!(table.subscribe(b, aapl.clone(), Instant::now()).is_empty());
///
/// // Last unsubscribe stops it
/// assert!(table.unsubscribe(a, &aapl).is_empty());
/// assert!(table.unsubscribe(b, &aapl).stop.contains(&aapl));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    /// Map from symbol to its subscribers.
    symbol_subscribers: HashMap<Symbol, HashMap<ConnectionId, SubscriptionEntry>>,
    /// Map from connection to its subscribed symbols.
    connection_symbols: HashMap<ConnectionId, HashSet<Symbol>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription.
    ///
    /// Idempotent: a repeated subscription keeps its original activity
    /// record and reports no changes.
    pub fn subscribe(
        &mut self,
        connection: ConnectionId,
        symbol: Symbol,
        now: Instant,
    ) -> SubscriptionChanges {
        let subscribers = self.symbol_subscribers.entry(symbol.clone()).or_default();
        if subscribers.contains_key(&connection) {
            return SubscriptionChanges::default();
        }

        let first = subscribers.is_empty();
        subscribers.insert(
            connection,
            SubscriptionEntry {
                subscribed_at: now,
                last_delivered_at: None,
            },
        );
        self.connection_symbols
            .entry(connection)
            .or_default()
            .insert(symbol.clone());

        if first {
            SubscriptionChanges::start_only([symbol])
        } else {
            SubscriptionChanges::default()
        }
    }

    /// Remove a subscription.
    ///
    /// Removing a subscription that does not exist reports no changes.
    pub fn unsubscribe(&mut self, connection: ConnectionId, symbol: &Symbol) -> SubscriptionChanges {
        let Some(symbols) = self.connection_symbols.get_mut(&connection) else {
            return SubscriptionChanges::default();
        };
        if !symbols.remove(symbol) {
            return SubscriptionChanges::default();
        }
        if symbols.is_empty() {
            self.connection_symbols.remove(&connection);
        }

        if self.detach(connection, symbol) {
            SubscriptionChanges::stop_only([symbol.clone()])
        } else {
            SubscriptionChanges::default()
        }
    }

    /// Remove every subscription held by a connection.
    pub fn remove_all_for(&mut self, connection: ConnectionId) -> SubscriptionChanges {
        let Some(symbols) = self.connection_symbols.remove(&connection) else {
            return SubscriptionChanges::default();
        };

        let emptied = symbols
            .into_iter()
            .filter(|symbol| self.detach(connection, symbol));

        SubscriptionChanges::stop_only(emptied)
    }

    /// Drop `connection` from the symbol's subscriber map.
    ///
    /// Returns `true` if the symbol has no subscribers left.
    fn detach(&mut self, connection: ConnectionId, symbol: &Symbol) -> bool {
        let Some(subscribers) = self.symbol_subscribers.get_mut(symbol) else {
            return false;
        };
        subscribers.remove(&connection);

        if subscribers.is_empty() {
            self.symbol_subscribers.remove(symbol);
            true
        } else {
            false
        }
    }

    /// Record a successful delivery for a subscription.
    pub fn record_delivery(&mut self, connection: ConnectionId, symbol: &Symbol, now: Instant) {
        if let Some(entry) = self
            .symbol_subscribers
            .get_mut(symbol)
            .and_then(|subscribers| subscribers.get_mut(&connection))
        {
            entry.last_delivered_at = Some(now);
        }
    }

    /// Subscriptions with no delivery (or, before the first delivery, no
    /// subscription) within `threshold` of `now`.
    #[must_use]
    pub fn stale_entries(&self, now: Instant, threshold: Duration) -> Vec<(ConnectionId, Symbol)> {
        self.symbol_subscribers
            .iter()
            .flat_map(|(symbol, subscribers)| {
                subscribers
                    .iter()
                    .filter(move |(_, entry)| now.duration_since(entry.last_activity()) > threshold)
                    .map(move |(connection, _)| (*connection, symbol.clone()))
            })
            .collect()
    }

    /// Every (connection, symbol) pair in the table.
    #[must_use]
    pub fn entries(&self) -> Vec<(ConnectionId, Symbol)> {
        self.connection_symbols
            .iter()
            .flat_map(|(connection, symbols)| {
                symbols.iter().map(move |symbol| (*connection, symbol.clone()))
            })
            .collect()
    }

    /// Connections subscribed to a symbol.
    #[must_use]
    pub fn subscribers_of(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        self.symbol_subscribers
            .get(symbol)
            .map(|subscribers| subscribers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols a connection is subscribed to.
    #[must_use]
    pub fn symbols_for(&self, connection: ConnectionId) -> Vec<Symbol> {
        self.connection_symbols
            .get(&connection)
            .map(|symbols| symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a subscription exists.
    #[must_use]
    pub fn contains(&self, connection: ConnectionId, symbol: &Symbol) -> bool {
        self.connection_symbols
            .get(&connection)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    /// Symbols with at least one subscriber.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.symbol_subscribers.keys().cloned().collect()
    }

    /// Number of symbols with at least one subscriber.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbol_subscribers.len()
    }

    /// Number of connections with at least one subscription.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_symbols.len()
    }

    /// Total number of (connection, symbol) subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.connection_symbols.values().map(HashSet::len).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn subscribe_new_symbol_starts_poller() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();

        let changes = table.subscribe(id, sym("AAPL"), Instant::now());

        assert!(changes.start.contains(&sym("AAPL")));
        assert!(changes.stop.is_empty());
    }

    #[test]
    fn subscribe_existing_symbol_shares_poller() {
        let mut table = SubscriptionTable::new();

        table.subscribe(ConnectionId::new(), sym("AAPL"), Instant::now());
        let changes = table.subscribe(ConnectionId::new(), sym("AAPL"), Instant::now());

        assert!(changes.is_empty());
        assert_eq!(table.subscribers_of(&sym("AAPL")).len(), 2);
    }

    #[test]
    fn subscribe_duplicate_is_idempotent() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();

        table.subscribe(id, sym("AAPL"), Instant::now());
        let changes = table.subscribe(id, sym("AAPL"), Instant::now());

        assert!(changes.is_empty());
        assert_eq!(table.subscribers_of(&sym("AAPL")), vec![id]);
        assert_eq!(table.subscription_count(), 1);
    }

    #[test]
    fn unsubscribe_with_remaining_subscribers() {
        let mut table = SubscriptionTable::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        table.subscribe(a, sym("AAPL"), Instant::now());
        table.subscribe(b, sym("AAPL"), Instant::now());

        let changes = table.unsubscribe(a, &sym("AAPL"));

        assert!(changes.is_empty());
        assert_eq!(table.subscribers_of(&sym("AAPL")), vec![b]);
    }

    #[test]
    fn unsubscribe_last_subscriber_stops_poller() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();

        table.subscribe(id, sym("AAPL"), Instant::now());
        let changes = table.unsubscribe(id, &sym("AAPL"));

        assert!(changes.stop.contains(&sym("AAPL")));
        assert!(table.active_symbols().is_empty());
        assert_eq!(table.connection_count(), 0);
    }

    #[test]
    fn unsubscribe_nonexistent_is_noop() {
        let mut table = SubscriptionTable::new();
        let a = ConnectionId::new();

        table.subscribe(a, sym("AAPL"), Instant::now());

        assert!(table.unsubscribe(a, &sym("MSFT")).is_empty());
        assert!(table.unsubscribe(ConnectionId::new(), &sym("AAPL")).is_empty());
        assert_eq!(table.symbol_count(), 1);
    }

    #[test]
    fn remove_all_for_cleans_up() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();

        table.subscribe(id, sym("AAPL"), Instant::now());
        table.subscribe(id, sym("MSFT"), Instant::now());
        table.subscribe(id, sym("GOOG"), Instant::now());

        let changes = table.remove_all_for(id);

        assert_eq!(changes.stop.len(), 3);
        assert!(table.symbols_for(id).is_empty());
        assert_eq!(table.symbol_count(), 0);
    }

    #[test]
    fn remove_all_for_preserves_other_connections() {
        let mut table = SubscriptionTable::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        table.subscribe(a, sym("AAPL"), Instant::now());
        table.subscribe(a, sym("MSFT"), Instant::now());
        table.subscribe(b, sym("AAPL"), Instant::now());

        let changes = table.remove_all_for(a);

        assert_eq!(changes.stop, HashSet::from([sym("MSFT")]));
        assert_eq!(table.subscribers_of(&sym("AAPL")), vec![b]);
    }

    #[test]
    fn remove_all_for_unknown_connection() {
        let mut table = SubscriptionTable::new();
        table.subscribe(ConnectionId::new(), sym("AAPL"), Instant::now());

        assert!(table.remove_all_for(ConnectionId::new()).is_empty());
        assert_eq!(table.symbol_count(), 1);
    }

    #[test]
    fn symbols_for_returns_connection_symbols() {
        let mut table = SubscriptionTable::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        table.subscribe(a, sym("AAPL"), Instant::now());
        table.subscribe(a, sym("MSFT"), Instant::now());
        table.subscribe(b, sym("GOOG"), Instant::now());

        let symbols = table.symbols_for(a);
        assert_eq!(symbols.len(), 2);
        assert!(symbols.contains(&sym("AAPL")));
        assert!(symbols.contains(&sym("MSFT")));
        assert_eq!(table.symbols_for(b), vec![sym("GOOG")]);
        assert!(table.symbols_for(ConnectionId::new()).is_empty());
    }

    #[test]
    fn counts_are_accurate() {
        let mut table = SubscriptionTable::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        table.subscribe(a, sym("AAPL"), Instant::now());
        table.subscribe(a, sym("MSFT"), Instant::now());
        table.subscribe(b, sym("AAPL"), Instant::now());

        assert_eq!(table.symbol_count(), 2);
        assert_eq!(table.connection_count(), 2);
        assert_eq!(table.subscription_count(), 3);
        assert_eq!(table.entries().len(), 3);
    }

    #[test]
    fn stale_entries_use_subscription_time_before_first_delivery() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();
        let start = Instant::now();

        table.subscribe(id, sym("AAPL"), start);

        let threshold = Duration::from_secs(60);
        assert!(table.stale_entries(start + Duration::from_secs(60), threshold).is_empty());
        assert_eq!(
            table.stale_entries(start + Duration::from_secs(61), threshold),
            vec![(id, sym("AAPL"))]
        );
    }

    #[test]
    fn delivery_refreshes_activity() {
        let mut table = SubscriptionTable::new();
        let id = ConnectionId::new();
        let start = Instant::now();

        table.subscribe(id, sym("AAPL"), start);
        table.record_delivery(id, &sym("AAPL"), start + Duration::from_secs(50));

        let threshold = Duration::from_secs(60);
        assert!(table.stale_entries(start + Duration::from_secs(100), threshold).is_empty());
        assert_eq!(
            table
                .stale_entries(start + Duration::from_secs(111), threshold)
                .len(),
            1
        );
    }

    #[test]
    fn record_delivery_for_unknown_subscription_is_ignored() {
        let mut table = SubscriptionTable::new();
        table.record_delivery(ConnectionId::new(), &sym("AAPL"), Instant::now());
        assert_eq!(table.symbol_count(), 0);
    }

    #[test]
    fn changes_merge_cancels_opposites() {
        let mut changes = SubscriptionChanges::start_only([sym("AAPL")]);
        changes.merge(SubscriptionChanges::stop_only([sym("AAPL"), sym("MSFT")]));

        assert!(changes.start.is_empty());
        assert_eq!(changes.stop, HashSet::from([sym("MSFT")]));
    }

    #[test]
    fn subscription_changes_is_empty() {
        assert!(SubscriptionChanges::default().is_empty());
        assert!(!SubscriptionChanges::start_only([sym("AAPL")]).is_empty());
        assert!(!SubscriptionChanges::stop_only([sym("AAPL")]).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize, usize),
        Unsubscribe(usize, usize),
        Disconnect(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..3usize).prop_map(|(c, s)| Op::Subscribe(c, s)),
            (0..4usize, 0..3usize).prop_map(|(c, s)| Op::Unsubscribe(c, s)),
            (0..4usize).prop_map(Op::Disconnect),
        ]
    }

    proptest! {
        /// The set of running pollers implied by the reported transitions
        /// always equals the set of symbols with subscribers, and both
        /// index directions agree.
        #[test]
        fn transitions_track_active_symbols(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let connections: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();
            let symbols = [sym("AAPL"), sym("MSFT"), sym("GOOG")];
            let mut table = SubscriptionTable::new();
            let mut running: HashSet<Symbol> = HashSet::new();

            for op in ops {
                let changes = match op {
                    Op::Subscribe(c, s) => table.subscribe(connections[c], symbols[s].clone(), Instant::now()),
                    Op::Unsubscribe(c, s) => table.unsubscribe(connections[c], &symbols[s]),
                    Op::Disconnect(c) => table.remove_all_for(connections[c]),
                };
                for symbol in changes.stop {
                    prop_assert!(running.remove(&symbol));
                }
                for symbol in changes.start {
                    prop_assert!(running.insert(symbol));
                }

                let active: HashSet<Symbol> = table.active_symbols().into_iter().collect();
                prop_assert_eq!(&active, &running);

                for (connection, symbol) in table.entries() {
                    prop_assert!(table.subscribers_of(&symbol).contains(&connection));
                }
                let forward: usize = active.iter().map(|s| table.subscribers_of(s).len()).sum();
                prop_assert_eq!(forward, table.subscription_count());
            }
        }
    }
}
