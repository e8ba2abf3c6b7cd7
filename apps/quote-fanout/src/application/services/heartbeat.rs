//! Heartbeat Loop
//!
//! Pings every connection once per interval. A connection that has not
//! answered the previous ping by the next sweep is terminated, so a dead
//! peer is detected within two intervals.

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::services::fanout::FanoutService;

impl FanoutService {
    /// Run heartbeat sweeps until `cancel` fires.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run_heartbeat(self, cancel: CancellationToken) {
        let period = self.settings().heartbeat_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = period.as_secs(), "Heartbeat loop started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Heartbeat loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.heartbeat_sweep();
                    if report.terminated > 0 {
                        tracing::warn!(
                            terminated = report.terminated,
                            pinged = report.pinged,
                            "Terminated unresponsive connections"
                        );
                    }
                }
            }
        }
    }
}
