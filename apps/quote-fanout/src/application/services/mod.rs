//! Application Services
//!
//! The fan-out core and the pieces it coordinates.
//!
//! - `FanoutService`: Single entry point for connection events, client
//!   messages, poller ticks and periodic sweeps
//! - `ConnectionRegistry`: Live connections and the connection cap
//! - `PollerSet`: One cancellable fetch task per subscribed symbol

mod broadcaster;
mod fanout;
mod heartbeat;
mod hub;
mod poller;
mod registry;
mod sweeper;

pub use broadcaster::DeliveryReport;
pub use fanout::{
    FanoutError, FanoutService, FanoutSettings, FanoutStats, HeartbeatReport, SweepReport,
};
pub use hub::HubState;
pub use poller::{PollerSet, run_poller};
pub use registry::{
    Admission, AdmissionError, ConnectionRegistry, HeartbeatPass, Outbound, OutboundSender,
    RemovalReason, SendFailure,
};
