//! WebSocket Transport
//!
//! Serves the fan-out protocol to browser and service clients.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket upgrade
//!
//! # Protocol
//!
//! JSON text frames in both directions. On connect the client receives a
//! `ping` message carrying its connection ID. Clients then send
//! `subscribe` / `unsubscribe` / `ping` messages and receive acks,
//! `quote` updates and `error` messages.

mod server;

pub use server::{ServerError, WebSocketServer, router};
