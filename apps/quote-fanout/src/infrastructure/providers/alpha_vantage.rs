//! Alpha Vantage quote provider.
//!
//! Calls `GET {base}/query?function=GLOBAL_QUOTE&symbol=..&apikey=..`.
//! The API reports throttling and bad requests in a 200 body, so the
//! payload is inspected before the quote is decoded.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::ports::{QuoteProvider, QuoteProviderError};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::config::ApiKey;

/// Alpha Vantage `GLOBAL_QUOTE` adapter.
#[derive(Debug)]
pub struct AlphaVantageQuoteProvider {
    client: reqwest::Client,
    api_key: ApiKey,
    base_url: String,
}

impl AlphaVantageQuoteProvider {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// Returns `QuoteProviderError::Configuration` if the HTTP client
    /// cannot be built.
    pub fn new(
        api_key: ApiKey,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, QuoteProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteProviderError::Configuration {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, symbol: &Symbol) -> Result<GlobalQuoteResponse, QuoteProviderError> {
        let url = format!("{}/query", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.expose()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteProviderError::RateLimited {
                message: "HTTP 429".to_string(),
            });
        }
        if !status.is_success() {
            return Err(QuoteProviderError::Http {
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                QuoteProviderError::Timeout
            } else {
                QuoteProviderError::InvalidResponse {
                    message: e.to_string(),
                }
            }
        })
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageQuoteProvider {
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, QuoteProviderError> {
        let response = self.fetch(symbol).await?;
        response.into_quote(symbol)
    }

    fn name(&self) -> &'static str {
        "alphavantage"
    }
}

fn map_transport_error(e: reqwest::Error) -> QuoteProviderError {
    if e.is_timeout() {
        QuoteProviderError::Timeout
    } else {
        QuoteProviderError::Connection {
            message: e.to_string(),
        }
    }
}

// API response types

#[derive(Debug, Default, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

impl GlobalQuoteResponse {
    fn into_quote(self, symbol: &Symbol) -> Result<Quote, QuoteProviderError> {
        if let Some(message) = self.note.or(self.information) {
            return Err(QuoteProviderError::RateLimited { message });
        }
        if let Some(message) = self.error_message {
            return Err(QuoteProviderError::Api { message });
        }

        let quote = self
            .global_quote
            .filter(|q| q.symbol.is_some())
            .ok_or_else(|| QuoteProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;

        let percent = quote
            .change_percent
            .as_deref()
            .map(|p| p.trim().trim_end_matches('%'));

        Ok(Quote {
            symbol: symbol.clone(),
            price: decimal_field("price", quote.price.as_deref())?,
            change: decimal_field("change", quote.change.as_deref())?,
            change_percent: decimal_field("change percent", percent)?,
            high: decimal_field("high", quote.high.as_deref())?,
            low: decimal_field("low", quote.low.as_deref())?,
            open: decimal_field("open", quote.open.as_deref())?,
            previous_close: decimal_field("previous close", quote.previous_close.as_deref())?,
            volume: volume_field(quote.volume.as_deref())?,
            // GLOBAL_QUOTE only carries a trading day
            timestamp: Utc::now(),
        })
    }
}

fn decimal_field(name: &str, raw: Option<&str>) -> Result<Decimal, QuoteProviderError> {
    let raw = raw.ok_or_else(|| QuoteProviderError::InvalidResponse {
        message: format!("missing {name}"),
    })?;
    Decimal::from_str(raw.trim()).map_err(|_| QuoteProviderError::InvalidResponse {
        message: format!("invalid {name}: {raw}"),
    })
}

fn volume_field(raw: Option<&str>) -> Result<u64, QuoteProviderError> {
    let raw = raw.ok_or_else(|| QuoteProviderError::InvalidResponse {
        message: "missing volume".to_string(),
    })?;
    raw.trim()
        .parse()
        .map_err(|_| QuoteProviderError::InvalidResponse {
            message: format!("invalid volume: {raw}"),
        })
}
