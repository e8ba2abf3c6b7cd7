//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteProvider`: Fetches the current quote for a symbol from an
//!   upstream market data source

use async_trait::async_trait;

use crate::domain::streaming::{Quote, Symbol};

/// Quote provider error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteProviderError {
    /// Transport-level failure reaching the provider.
    #[error("Quote provider connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Request exceeded the configured timeout.
    #[error("Quote provider request timed out")]
    Timeout,

    /// Provider throttled the request.
    #[error("Quote provider rate limit reached: {message}")]
    RateLimited {
        /// Provider notice.
        message: String,
    },

    /// Provider has no data for the symbol.
    #[error("Symbol not found: {symbol}")]
    SymbolNotFound {
        /// The unknown symbol.
        symbol: String,
    },

    /// Non-success HTTP status.
    #[error("Quote provider returned HTTP {status}")]
    Http {
        /// Status code.
        status: u16,
    },

    /// Provider reported an error in the response body.
    #[error("Quote provider API error: {message}")]
    Api {
        /// Error details.
        message: String,
    },

    /// Response could not be decoded into a quote.
    #[error("Invalid quote provider response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },

    /// Provider is misconfigured.
    #[error("Quote provider configuration error: {message}")]
    Configuration {
        /// Error details.
        message: String,
    },
}

/// Port for fetching quotes from an upstream provider.
///
/// This is a driven (secondary/outbound) port. Each call is one upstream
/// request; the fan-out service guarantees at most one poller per symbol
/// calls it at any time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the current quote for a symbol.
    ///
    /// # Errors
    ///
    /// Returns `QuoteProviderError` if the upstream request fails or the
    /// response cannot be decoded.
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, QuoteProviderError>;

    /// Provider name for logs and health output.
    fn name(&self) -> &'static str;
}
