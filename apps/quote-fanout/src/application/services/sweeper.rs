//! Stale-Subscription Sweeper Loop
//!
//! Secondary safety net behind the heartbeat: periodically drops
//! subscriptions whose connection is dead or which have gone quiet for
//! longer than the stale threshold.

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::services::fanout::FanoutService;

impl FanoutService {
    /// Run stale sweeps until `cancel` fires.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run_stale_sweeper(self, cancel: CancellationToken) {
        let period = self.settings().sweep_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = period.as_secs(),
            threshold_secs = self.settings().stale_threshold.as_secs(),
            "Stale sweeper started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Stale sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.sweep_stale();
                    if report.subscriptions > 0 {
                        tracing::info!(
                            subscriptions = report.subscriptions,
                            connections = report.connections,
                            stopped_pollers = report.stopped_pollers,
                            "Swept stale subscriptions"
                        );
                    }
                }
            }
        }
    }
}
