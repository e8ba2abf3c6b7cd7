//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the fan-out service and the port interfaces
//! that define how it reaches upstream quote providers.

/// Port interfaces for external systems.
pub mod ports;

/// Fan-out service: connections, subscriptions, pollers and sweeps.
pub mod services;
