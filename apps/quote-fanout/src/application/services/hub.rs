//! Hub State
//!
//! Registry, subscription table and poller set, always mutated together
//! under the fan-out service's single lock.

use crate::application::services::poller::PollerSet;
use crate::application::services::registry::{ConnectionRegistry, RemovalReason};
use crate::domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionTable};
use crate::infrastructure::metrics;

/// Everything the fan-out service mutates.
#[derive(Debug)]
pub struct HubState {
    /// Live connections.
    pub registry: ConnectionRegistry,
    /// Symbol ↔ connection index.
    pub table: SubscriptionTable,
    /// Running pollers.
    pub pollers: PollerSet,
}

impl HubState {
    /// Create empty state with the given connection cap.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(max_connections),
            table: SubscriptionTable::new(),
            pollers: PollerSet::new(),
        }
    }

    /// Remove a connection and every subscription it holds.
    ///
    /// Idempotent. The returned changes must be applied to the poller set
    /// before the lock is released.
    pub fn remove_connection(
        &mut self,
        id: ConnectionId,
        reason: RemovalReason,
    ) -> SubscriptionChanges {
        let removed = self.registry.remove(id);
        let changes = self.table.remove_all_for(id);

        if removed {
            metrics::record_connection_removed(reason.as_str());
            tracing::info!(
                connection_id = %id,
                reason = reason.as_str(),
                stopped_symbols = changes.stop.len(),
                "Connection removed"
            );
        }

        changes
    }

    /// Publish the current counts to the metric gauges.
    pub fn publish_gauges(&self) {
        metrics::set_hub_gauges(
            self.registry.len(),
            self.table.subscription_count(),
            self.pollers.len(),
        );
    }
}
