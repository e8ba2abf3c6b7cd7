//! Quote Provider Adapters
//!
//! Implementations of the `QuoteProvider` port.
//!
//! - `SimulatedQuoteProvider`: In-process random walk, no network
//! - `AlphaVantageQuoteProvider`: `GLOBAL_QUOTE` endpoint over HTTPS

mod alpha_vantage;
mod simulated;

use std::sync::Arc;

pub use alpha_vantage::AlphaVantageQuoteProvider;
pub use simulated::SimulatedQuoteProvider;

use crate::application::ports::{QuoteProvider, QuoteProviderError};
use crate::infrastructure::config::{ProviderKind, ProviderSettings};

/// Build the provider selected by configuration.
///
/// # Errors
///
/// Returns `QuoteProviderError::Configuration` if Alpha Vantage is selected
/// without an API key or its HTTP client cannot be built.
pub fn build_provider(
    settings: &ProviderSettings,
) -> Result<Arc<dyn QuoteProvider>, QuoteProviderError> {
    match settings.kind {
        ProviderKind::Simulated => Ok(Arc::new(SimulatedQuoteProvider::new())),
        ProviderKind::AlphaVantage => {
            let api_key =
                settings
                    .api_key
                    .clone()
                    .ok_or_else(|| QuoteProviderError::Configuration {
                        message: "ALPHA_VANTAGE_API_KEY is not set".to_string(),
                    })?;
            let provider = AlphaVantageQuoteProvider::new(
                api_key,
                settings.base_url.clone(),
                settings.request_timeout,
            )?;
            Ok(Arc::new(provider))
        }
    }
}
