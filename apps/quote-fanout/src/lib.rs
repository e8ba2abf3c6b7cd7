#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Fan-out - Real-time Quote Distribution
//!
//! A WebSocket service that lets many clients subscribe to ticker symbols
//! while running a single upstream polling task per subscribed symbol.
//! Each quote fetched is fanned out to every subscriber of that symbol.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Symbols and quotes
//!   - `subscription`: Connection IDs and the subscription table
//!   - `protocol`: Client and server JSON messages
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `QuoteProvider` interface
//!   - `services`: Connection registry, pollers, fan-out coordination
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `providers`: Simulated and Alpha Vantage quote providers
//!   - `websocket`: WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  +----------------+
//!  Quote API <---- | poller (AAPL)  | --+
//!                  +----------------+   |    +-------------+
//!                  +----------------+   +--> |   Fan-out   | --> Client 1
//!  Quote API <---- | poller (MSFT)  | ----->  |   Service   | --> Client 2
//!                  +----------------+        +-------------+ --> Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::protocol::{ClientCommand, ProtocolError, ServerMessage};
pub use domain::streaming::{Quote, Symbol, SymbolError};
pub use domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionTable};

// Ports
pub use application::ports::{QuoteProvider, QuoteProviderError};

// Fan-out service
pub use application::services::{
    Admission, AdmissionError, FanoutError, FanoutService, FanoutSettings, FanoutStats,
    Outbound, RemovalReason,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FanoutConfig, ProviderKind, ServerSettings};

// Providers
pub use infrastructure::providers::{
    AlphaVantageQuoteProvider, SimulatedQuoteProvider, build_provider,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{ServerError, WebSocketServer};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
