//! Fan-out Service
//!
//! Ties the registry, subscription table, pollers and broadcaster
//! together. Every event takes the hub lock once, performs its whole
//! read-modify-write, applies the resulting poller transitions and
//! releases the lock. The only suspending work, the upstream fetch, runs
//! in the poller tasks without the lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteProvider, QuoteProviderError};
use crate::application::services::hub::HubState;
use crate::application::services::poller::run_poller;
use crate::application::services::registry::{
    Admission, AdmissionError, OutboundSender, RemovalReason,
};
use crate::domain::protocol::{ClientCommand, ProtocolError, ServerMessage};
use crate::domain::streaming::{Quote, Symbol};
use crate::domain::subscription::{ConnectionId, SubscriptionChanges};
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Tunables for the fan-out core.
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    /// Connection cap.
    pub max_connections: usize,
    /// Per-symbol poll period.
    pub poll_interval: Duration,
    /// Heartbeat sweep period.
    pub heartbeat_interval: Duration,
    /// Maximum quiet time before a subscription is considered stale.
    pub stale_threshold: Duration,
    /// Stale sweep period.
    pub sweep_interval: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            outbound_buffer: 64,
        }
    }
}

// =============================================================================
// Errors and Reports
// =============================================================================

/// Fan-out operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FanoutError {
    /// The connection is not (or no longer) registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Point-in-time counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    /// Live connections.
    pub connections: usize,
    /// Active (connection, symbol) subscriptions.
    pub subscriptions: usize,
    /// Symbols with at least one subscriber.
    pub symbols: usize,
    /// Running pollers.
    pub pollers: usize,
    /// Connection cap.
    pub max_connections: usize,
}

// =============================================================================
// Service
// =============================================================================

struct Shared {
    state: Mutex<HubState>,
    provider: Arc<dyn QuoteProvider>,
    settings: FanoutSettings,
    shutdown: CancellationToken,
}

/// Handle to the fan-out core. Cheap to clone.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use quote_fanout::{FanoutService, FanoutSettings, SimulatedQuoteProvider};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let service = FanoutService::new(
///     Arc::new(SimulatedQuoteProvider::new()),
///     FanoutSettings::default(),
///     CancellationToken::new(),
/// );
///
/// let (tx, _rx) = mpsc::channel(16);
/// let admission = service.admit(tx).unwrap();
/// service.handle_client_message(admission.id, r#"{"type":"subscribe","symbol":"AAPL"}"#);
///
/// assert_eq!(service.stats().pollers, 1);
/// # }
/// ```
#[derive(Clone)]
pub struct FanoutService {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FanoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutService")
            .field("provider", &self.shared.provider.name())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl FanoutService {
    /// Create a service.
    ///
    /// Pollers run as children of `shutdown`; cancelling it stops them all.
    #[must_use]
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        settings: FanoutSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(HubState::new(settings.max_connections)),
                provider,
                settings,
                shutdown,
            }),
        }
    }

    /// Service settings.
    #[must_use]
    pub fn settings(&self) -> &FanoutSettings {
        &self.shared.settings
    }

    /// Name of the configured quote provider.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.shared.provider.name()
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Register a connection and greet it with its ID.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError` if the cap is reached or the service is
    /// shutting down.
    pub fn admit(&self, sender: OutboundSender) -> Result<Admission, AdmissionError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(AdmissionError::ShuttingDown);
        }

        let mut state = self.shared.state.lock();
        let admission = match state.registry.admit(sender, Instant::now()) {
            Ok(admission) => admission,
            Err(e) => {
                metrics::record_connection_rejected();
                tracing::warn!(
                    connections = state.registry.len(),
                    error = %e,
                    "Connection rejected"
                );
                return Err(e);
            }
        };

        tracing::info!(
            connection_id = %admission.id,
            connections = state.registry.len(),
            "Connection admitted"
        );

        let report = state.send_to(admission.id, ServerMessage::connected(admission.id));
        self.apply(&mut state, report.changes);

        Ok(admission)
    }

    /// Remove a connection and all of its subscriptions. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) {
        self.remove_with_reason(id, RemovalReason::Closed);
    }

    fn remove_with_reason(&self, id: ConnectionId, reason: RemovalReason) {
        let mut state = self.shared.state.lock();
        let changes = state.remove_connection(id, reason);
        self.apply(&mut state, changes);
    }

    /// Clear a connection's heartbeat flag.
    pub fn record_pong(&self, id: ConnectionId) {
        self.shared.state.lock().registry.record_pong(id);
    }

    // =========================================================================
    // Client Messages
    // =========================================================================

    /// Handle one inbound text frame.
    ///
    /// Protocol errors are reported back to the client; the connection
    /// stays open.
    pub fn handle_client_message(&self, id: ConnectionId, text: &str) {
        match ClientCommand::parse(text) {
            Ok(command) => self.handle_command(id, command),
            Err(e) => self.reject_message(id, &e),
        }
    }

    /// Report a protocol error to the client.
    pub fn reject_message(&self, id: ConnectionId, error: &ProtocolError) {
        tracing::debug!(connection_id = %id, error = %error, "Rejected client message");
        self.reply(id, ServerMessage::error(None, error.to_string()));
    }

    /// Dispatch a validated command.
    pub fn handle_command(&self, id: ConnectionId, command: ClientCommand) {
        let result = match command {
            ClientCommand::Subscribe(symbol) => self.subscribe(id, symbol),
            ClientCommand::Unsubscribe(symbol) => self.unsubscribe(id, &symbol),
            ClientCommand::Ping => {
                self.record_pong(id);
                self.reply(id, ServerMessage::pong());
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "Dropped command for departed connection");
        }
    }

    /// Subscribe a connection to a symbol and acknowledge it.
    ///
    /// On the first subscriber the poller starts before this returns and
    /// fetches immediately. Repeat subscriptions are re-acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::UnknownConnection` if the connection is gone.
    pub fn subscribe(&self, id: ConnectionId, symbol: Symbol) -> Result<(), FanoutError> {
        let mut state = self.shared.state.lock();
        if !state.registry.contains(id) {
            return Err(FanoutError::UnknownConnection(id));
        }

        let mut changes = state.table.subscribe(id, symbol.clone(), Instant::now());
        tracing::debug!(connection_id = %id, symbol = %symbol, "Subscribed");

        let report = state.send_to(id, ServerMessage::subscribed(symbol));
        changes.merge(report.changes);
        self.apply(&mut state, changes);

        Ok(())
    }

    /// Unsubscribe a connection from a symbol and acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::UnknownConnection` if the connection is gone.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &Symbol) -> Result<(), FanoutError> {
        let mut state = self.shared.state.lock();
        if !state.registry.contains(id) {
            return Err(FanoutError::UnknownConnection(id));
        }

        let mut changes = state.table.unsubscribe(id, symbol);
        tracing::debug!(connection_id = %id, symbol = %symbol, "Unsubscribed");

        let report = state.send_to(id, ServerMessage::unsubscribed(symbol.clone()));
        changes.merge(report.changes);
        self.apply(&mut state, changes);

        Ok(())
    }

    fn reply(&self, id: ConnectionId, message: ServerMessage) {
        let mut state = self.shared.state.lock();
        let report = state.send_to(id, message);
        self.apply(&mut state, report.changes);
    }

    // =========================================================================
    // Sweeps
    // =========================================================================

    /// Run one heartbeat pass.
    ///
    /// Connections that missed the previous ping are terminated through
    /// the disconnect path; the rest are pinged.
    pub fn heartbeat_sweep(&self) -> HeartbeatReport {
        let mut state = self.shared.state.lock();
        let pass = state.registry.heartbeat();

        let mut changes = SubscriptionChanges::default();
        for (id, reason) in &pass.expired {
            changes.merge(state.remove_connection(*id, *reason));
        }
        self.apply(&mut state, changes);

        HeartbeatReport {
            pinged: pass.pinged,
            terminated: pass.expired.len(),
        }
    }

    /// Remove dead and stale subscriptions.
    ///
    /// A subscription goes if its connection is gone or unwritable, or if
    /// it saw no delivery (or, before the first delivery, was created more
    /// than) `stale_threshold` ago.
    pub fn sweep_stale(&self) -> SweepReport {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        let mut changes = SubscriptionChanges::default();
        let mut report = SweepReport::default();

        let mut dead: Vec<ConnectionId> = state
            .table
            .entries()
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !state.registry.is_writable(*id))
            .collect();
        dead.sort_unstable();
        dead.dedup();

        for id in dead {
            report.subscriptions += state.table.symbols_for(id).len();
            if state.registry.contains(id) {
                report.connections += 1;
                changes.merge(state.remove_connection(id, RemovalReason::Unwritable));
            } else {
                changes.merge(state.table.remove_all_for(id));
            }
        }

        for (id, symbol) in state
            .table
            .stale_entries(now, self.shared.settings.stale_threshold)
        {
            tracing::debug!(connection_id = %id, symbol = %symbol, "Removing stale subscription");
            report.subscriptions += 1;
            changes.merge(state.table.unsubscribe(id, &symbol));
        }

        report.stopped_pollers = changes.stop.len();
        self.apply(&mut state, changes);

        if report.subscriptions > 0 {
            metrics::record_stale_swept(report.subscriptions as u64);
        }

        report
    }

    // =========================================================================
    // Pollers
    // =========================================================================

    /// Apply poller transitions. Must run under the same lock as the
    /// mutation that produced them.
    fn apply(&self, state: &mut HubState, changes: SubscriptionChanges) {
        for symbol in &changes.stop {
            if state.pollers.stop(symbol) {
                tracing::info!(symbol = %symbol, "Poller stopped");
            }
        }

        for symbol in changes.start {
            self.start_poller(state, symbol);
        }

        state.publish_gauges();
    }

    fn start_poller(&self, state: &mut HubState, symbol: Symbol) {
        if state.pollers.is_running(&symbol) || self.shared.shutdown.is_cancelled() {
            return;
        }

        let cancel = self.shared.shutdown.child_token();
        state.pollers.insert(symbol.clone(), cancel.clone());
        tracing::info!(symbol = %symbol, "Poller started");

        let shared = Arc::downgrade(&self.shared);
        let token = cancel.clone();
        tokio::spawn(run_poller(
            symbol,
            Arc::clone(&self.shared.provider),
            self.shared.settings.poll_interval,
            cancel,
            move |symbol, result| {
                shared
                    .upgrade()
                    .is_some_and(|shared| Self { shared }.deliver(symbol, result, &token))
            },
        ));
    }

    /// Broadcast a fetch result to the symbol's current subscribers.
    ///
    /// Returns `false` if the poller was cancelled meanwhile.
    fn deliver(
        &self,
        symbol: &Symbol,
        result: Result<Quote, QuoteProviderError>,
        cancel: &CancellationToken,
    ) -> bool {
        let message = match result {
            Ok(quote) => ServerMessage::quote(quote),
            Err(e) => {
                ServerMessage::error(Some(symbol.clone()), format!("Failed to fetch quote: {e}"))
            }
        };

        let mut state = self.shared.state.lock();
        if cancel.is_cancelled() {
            return false;
        }

        let report = state.broadcast(symbol, &message, Instant::now());
        self.apply(&mut state, report.changes);

        !cancel.is_cancelled()
    }

    // =========================================================================
    // Shutdown and Introspection
    // =========================================================================

    /// Stop every poller and terminate every connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let mut state = self.shared.state.lock();
        for id in state.registry.ids() {
            state.remove_connection(id, RemovalReason::Shutdown);
        }
        state.pollers.stop_all();
        state.publish_gauges();

        tracing::info!("Fan-out service shut down");
    }

    /// Token cancelled when the service shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Point-in-time counts.
    #[must_use]
    pub fn stats(&self) -> FanoutStats {
        let state = self.shared.state.lock();
        FanoutStats {
            connections: state.registry.len(),
            subscriptions: state.table.subscription_count(),
            symbols: state.table.symbol_count(),
            pollers: state.pollers.len(),
            max_connections: state.registry.max_connections(),
        }
    }

    /// Symbols with a running poller.
    #[must_use]
    pub fn active_pollers(&self) -> Vec<Symbol> {
        self.shared.state.lock().pollers.symbols()
    }

    /// Current subscribers of a symbol.
    #[must_use]
    pub fn subscribers_of(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        self.shared.state.lock().table.subscribers_of(symbol)
    }

    /// Symbols a connection is subscribed to.
    #[must_use]
    pub fn symbols_for(&self, id: ConnectionId) -> Vec<Symbol> {
        self.shared.state.lock().table.symbols_for(id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.shared.state.lock().registry.contains(id)
    }
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections pinged.
    pub pinged: usize,
    /// Connections terminated.
    pub terminated: usize,
}

/// Outcome of one stale sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Subscriptions removed.
    pub subscriptions: usize,
    /// Unwritable connections removed.
    pub connections: usize,
    /// Pollers stopped.
    pub stopped_pollers: usize,
}
