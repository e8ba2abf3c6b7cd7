//! Broadcaster
//!
//! Queues messages on connection outbound channels. A connection whose
//! queue is closed or full is pruned through the normal disconnect path;
//! one failed target never affects the others.

use tokio::time::Instant;

use crate::application::services::hub::HubState;
use crate::application::services::registry::{Outbound, RemovalReason, SendFailure};
use crate::domain::protocol::ServerMessage;
use crate::domain::streaming::Symbol;
use crate::domain::subscription::{ConnectionId, SubscriptionChanges};
use crate::infrastructure::metrics;

/// Outcome of a send or broadcast.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Messages queued.
    pub delivered: usize,
    /// Connections pruned.
    pub pruned: usize,
    /// Poller transitions caused by pruning.
    pub changes: SubscriptionChanges,
}

impl HubState {
    /// Queue a message for one connection.
    pub fn send_to(&mut self, id: ConnectionId, message: ServerMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        self.deliver_one(id, message, &mut report);
        report
    }

    /// Queue a message for every current subscriber of `symbol`.
    ///
    /// Successful deliveries refresh the subscription's activity time.
    pub fn broadcast(
        &mut self,
        symbol: &Symbol,
        message: &ServerMessage,
        now: Instant,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for id in self.table.subscribers_of(symbol) {
            if self.deliver_one(id, message.clone(), &mut report) {
                self.table.record_delivery(id, symbol, now);
            }
        }

        if report.pruned > 0 {
            tracing::debug!(
                symbol = %symbol,
                delivered = report.delivered,
                pruned = report.pruned,
                "Pruned unwritable subscribers during broadcast"
            );
        }

        report
    }

    fn deliver_one(
        &mut self,
        id: ConnectionId,
        message: ServerMessage,
        report: &mut DeliveryReport,
    ) -> bool {
        let kind = message.kind();

        match self.registry.send(id, Outbound::Message(message)) {
            Ok(()) => {
                metrics::record_message_sent(kind);
                report.delivered += 1;
                true
            }
            Err(SendFailure::Unknown) => {
                report.changes.merge(self.table.remove_all_for(id));
                false
            }
            Err(failure) => {
                tracing::debug!(connection_id = %id, error = %failure, "Pruning connection");
                report.pruned += 1;
                report
                    .changes
                    .merge(self.remove_connection(id, RemovalReason::Unwritable));
                false
            }
        }
    }
}
