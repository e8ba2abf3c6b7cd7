//! Domain Layer - Core quote fan-out types.
//!
//! Symbols, quotes, the subscription table and the client wire protocol.
//! Nothing here performs I/O.

/// Client wire protocol.
pub mod protocol;

/// Symbols and quote snapshots.
pub mod streaming;

/// Subscription tracking.
pub mod subscription;
