//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers that expose the
//! fan-out service.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Quote provider adapters (simulated, Alpha Vantage).
pub mod providers;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket server for fan-out clients.
pub mod websocket;
