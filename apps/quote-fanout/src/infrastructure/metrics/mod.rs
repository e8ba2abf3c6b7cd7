//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: Live client connections, rejections and removals
//! - **Subscriptions**: Active subscriptions and running pollers
//! - **Provider**: Upstream request outcomes and latency
//! - **Messages**: Messages enqueued to clients by type
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Connections
    describe_gauge!(
        "quote_fanout_connections",
        "Number of live client connections"
    );
    describe_counter!(
        "quote_fanout_connections_rejected_total",
        "Total connections rejected at capacity"
    );
    describe_counter!(
        "quote_fanout_connections_removed_total",
        "Total connections removed by reason"
    );

    // Subscriptions
    describe_gauge!(
        "quote_fanout_subscriptions",
        "Number of active (connection, symbol) subscriptions"
    );
    describe_gauge!("quote_fanout_pollers", "Number of running symbol pollers");
    describe_counter!(
        "quote_fanout_stale_subscriptions_swept_total",
        "Total subscriptions removed by the stale sweeper"
    );

    // Provider
    describe_counter!(
        "quote_fanout_provider_requests_total",
        "Total upstream quote requests by outcome"
    );
    describe_histogram!(
        "quote_fanout_provider_latency_seconds",
        "Upstream quote request latency"
    );

    // Messages
    describe_counter!(
        "quote_fanout_messages_sent_total",
        "Total messages enqueued to clients by type"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// Quote returned.
    Success,
    /// Provider returned an error.
    Error,
}

impl ProviderOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Record a rejected connection.
pub fn record_connection_rejected() {
    counter!("quote_fanout_connections_rejected_total").increment(1);
}

/// Record a removed connection.
pub fn record_connection_removed(reason: &'static str) {
    counter!("quote_fanout_connections_removed_total", "reason" => reason).increment(1);
}

/// Record a message enqueued to a client.
pub fn record_message_sent(message_type: &'static str) {
    counter!("quote_fanout_messages_sent_total", "message_type" => message_type).increment(1);
}

/// Record an upstream request.
pub fn record_provider_request(outcome: ProviderOutcome, duration: Duration) {
    counter!(
        "quote_fanout_provider_requests_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("quote_fanout_provider_latency_seconds").record(duration.as_secs_f64());
}

/// Record subscriptions removed by the stale sweeper.
pub fn record_stale_swept(count: u64) {
    counter!("quote_fanout_stale_subscriptions_swept_total").increment(count);
}

/// Update the hub gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_hub_gauges(connections: usize, subscriptions: usize, pollers: usize) {
    gauge!("quote_fanout_connections").set(connections as f64);
    gauge!("quote_fanout_subscriptions").set(subscriptions as f64);
    gauge!("quote_fanout_pollers").set(pollers as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_outcome_as_str() {
        assert_eq!(ProviderOutcome::Success.as_str(), "success");
        assert_eq!(ProviderOutcome::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_connection_rejected();
        record_connection_removed("closed");
        record_message_sent("quote");
        record_provider_request(ProviderOutcome::Success, Duration::from_millis(5));
        set_hub_gauges(1, 2, 1);
    }
}
