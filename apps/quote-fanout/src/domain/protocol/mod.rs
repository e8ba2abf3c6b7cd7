//! Client Wire Protocol
//!
//! JSON messages exchanged with WebSocket clients. Every message carries a
//! `type` discriminator; server messages also carry a `timestamp` in
//! milliseconds since the Unix epoch.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{Quote, Symbol, SymbolError};
use crate::domain::subscription::ConnectionId;

// =============================================================================
// Client -> Server
// =============================================================================

/// Raw client message as it appears on the wire.
///
/// Symbols stay unvalidated here so a bad symbol can be reported back with
/// a precise error instead of a generic parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        #[serde(default)]
        symbol: Option<String>,
    },
    Unsubscribe {
        #[serde(default)]
        symbol: Option<String>,
    },
    Ping,
}

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start receiving quotes for a symbol.
    Subscribe(Symbol),
    /// Stop receiving quotes for a symbol.
    Unsubscribe(Symbol),
    /// Application-level liveness probe.
    Ping,
}

impl ClientCommand {
    /// Parse a text frame into a command.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not a known JSON message or
    /// a subscription request lacks a valid symbol.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
                message: e.to_string(),
            })?;

        match message {
            ClientMessage::Subscribe { symbol } => {
                Ok(Self::Subscribe(require_symbol(symbol.as_deref(), "subscribe")?))
            }
            ClientMessage::Unsubscribe { symbol } => Ok(Self::Unsubscribe(require_symbol(
                symbol.as_deref(),
                "unsubscribe",
            )?)),
            ClientMessage::Ping => Ok(Self::Ping),
        }
    }
}

fn require_symbol(raw: Option<&str>, action: &'static str) -> Result<Symbol, ProtocolError> {
    let raw = raw.ok_or(ProtocolError::MissingSymbol { action })?;
    Symbol::parse(raw).map_err(|source| ProtocolError::InvalidSymbol {
        symbol: raw.to_string(),
        source,
    })
}

/// Errors from decoding client frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or not a known message type.
    #[error("Invalid message format: {message}")]
    Malformed {
        /// Decoder error.
        message: String,
    },
    /// Subscription request without a symbol.
    #[error("Symbol is required for {action}")]
    MissingSymbol {
        /// Requested action.
        action: &'static str,
    },
    /// Symbol failed validation.
    #[error("Invalid symbol {symbol:?}: {source}")]
    InvalidSymbol {
        /// Symbol as sent by the client.
        symbol: String,
        /// Validation failure.
        source: SymbolError,
    },
    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    UnsupportedFrame,
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Outbound message to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Subscription acknowledgement.
    Subscribe {
        /// Subscribed symbol.
        symbol: Symbol,
        /// Acknowledgement status.
        data: AckData,
        /// Milliseconds since epoch.
        timestamp: i64,
    },
    /// Unsubscription acknowledgement.
    Unsubscribe {
        /// Unsubscribed symbol.
        symbol: Symbol,
        /// Acknowledgement status.
        data: AckData,
        /// Milliseconds since epoch.
        timestamp: i64,
    },
    /// Connection greeting or reply to a client ping.
    Ping {
        /// Liveness payload.
        data: PingData,
        /// Milliseconds since epoch.
        timestamp: i64,
    },
    /// Quote update for a subscribed symbol.
    Quote {
        /// Quoted symbol.
        symbol: Symbol,
        /// Quote snapshot.
        data: Quote,
        /// Milliseconds since epoch.
        timestamp: i64,
    },
    /// Error report, optionally scoped to a symbol.
    Error {
        /// Affected symbol, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<Symbol>,
        /// Error payload.
        data: ErrorData,
        /// Milliseconds since epoch.
        timestamp: i64,
    },
}

/// Acknowledgement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckData {
    /// Resulting subscription state.
    pub status: AckStatus,
}

/// Subscription state reported in acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Symbol is subscribed.
    Subscribed,
    /// Symbol is no longer subscribed.
    Unsubscribed,
}

/// Ping payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingData {
    /// Greeting or reply.
    pub status: PingStatus,
    /// Assigned connection ID, present on the greeting.
    #[serde(
        rename = "connectionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<ConnectionId>,
}

/// Ping kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    /// Sent once after a connection is admitted.
    Connected,
    /// Reply to a client `ping`.
    Pong,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable error.
    pub error: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl ServerMessage {
    /// Greeting sent after admission.
    #[must_use]
    pub fn connected(connection: ConnectionId) -> Self {
        Self::Ping {
            data: PingData {
                status: PingStatus::Connected,
                connection_id: Some(connection),
            },
            timestamp: now_millis(),
        }
    }

    /// Reply to a client `ping`.
    #[must_use]
    pub fn pong() -> Self {
        Self::Ping {
            data: PingData {
                status: PingStatus::Pong,
                connection_id: None,
            },
            timestamp: now_millis(),
        }
    }

    /// Subscription acknowledgement.
    #[must_use]
    pub fn subscribed(symbol: Symbol) -> Self {
        Self::Subscribe {
            symbol,
            data: AckData {
                status: AckStatus::Subscribed,
            },
            timestamp: now_millis(),
        }
    }

    /// Unsubscription acknowledgement.
    #[must_use]
    pub fn unsubscribed(symbol: Symbol) -> Self {
        Self::Unsubscribe {
            symbol,
            data: AckData {
                status: AckStatus::Unsubscribed,
            },
            timestamp: now_millis(),
        }
    }

    /// Quote update.
    #[must_use]
    pub fn quote(quote: Quote) -> Self {
        Self::Quote {
            symbol: quote.symbol.clone(),
            data: quote,
            timestamp: now_millis(),
        }
    }

    /// Error report.
    #[must_use]
    pub fn error(symbol: Option<Symbol>, error: impl Into<String>) -> Self {
        Self::Error {
            symbol,
            data: ErrorData {
                error: error.into(),
            },
            timestamp: now_millis(),
        }
    }

    /// Message type name, used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping { .. } => "ping",
            Self::Quote { .. } => "quote",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[test_case(r#"{"type":"subscribe","symbol":"aapl"}"#, ClientCommand::Subscribe(symbol("AAPL")) ; "subscribe normalizes symbol")]
    #[test_case(r#"{"type":"unsubscribe","symbol":"MSFT"}"#, ClientCommand::Unsubscribe(symbol("MSFT")) ; "unsubscribe")]
    #[test_case(r#"{"type":"ping","timestamp":123}"#, ClientCommand::Ping ; "ping ignores extra fields")]
    fn parse_valid(raw: &str, expected: ClientCommand) {
        assert_eq!(ClientCommand::parse(raw).unwrap(), expected);
    }

    #[test]
    fn parse_missing_symbol() {
        let err = ClientCommand::parse(r#"{"type":"subscribe"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingSymbol { action: "subscribe" });
    }

    #[test]
    fn parse_invalid_symbol() {
        let err = ClientCommand::parse(r#"{"type":"subscribe","symbol":"   "}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSymbol { .. }));
    }

    #[test_case("not json" ; "not json")]
    #[test_case(r#"{"type":"explode"}"# ; "unknown type")]
    #[test_case(r#"{"symbol":"AAPL"}"# ; "missing type")]
    fn parse_rejects_garbage(raw: &str) {
        assert!(matches!(
            ClientCommand::parse(raw),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn connected_greeting_shape() {
        let id = ConnectionId::new();
        let value = serde_json::to_value(ServerMessage::connected(id)).unwrap();

        assert_eq!(value["type"], "ping");
        assert_eq!(value["data"]["status"], "connected");
        assert_eq!(value["data"]["connectionId"], id.to_string());
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn pong_has_no_connection_id() {
        let value = serde_json::to_value(ServerMessage::pong()).unwrap();
        assert_eq!(value["data"], json!({"status": "pong"}));
    }

    #[test]
    fn ack_shapes() {
        let aapl = Symbol::parse("AAPL").unwrap();

        let value = serde_json::to_value(ServerMessage::subscribed(aapl.clone())).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["data"], json!({"status": "subscribed"}));

        let value = serde_json::to_value(ServerMessage::unsubscribed(aapl)).unwrap();
        assert_eq!(value["type"], "unsubscribe");
        assert_eq!(value["data"], json!({"status": "unsubscribed"}));
    }

    #[test]
    fn error_omits_absent_symbol() {
        let value = serde_json::to_value(ServerMessage::error(None, "boom")).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value.get("symbol").is_none());
        assert_eq!(value["data"]["error"], "boom");

        let scoped = ServerMessage::error(Some(Symbol::parse("AAPL").unwrap()), "upstream down");
        let value = serde_json::to_value(scoped).unwrap();
        assert_eq!(value["symbol"], "AAPL");
    }

    #[test]
    fn server_message_decodes_back() {
        let message = ServerMessage::subscribed(Symbol::parse("AAPL").unwrap());
        let text = serde_json::to_string(&message).unwrap();
        let decoded: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, message);
    }
}
