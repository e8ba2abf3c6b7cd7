//! Configuration Module
//!
//! Configuration loading for the fan-out service.

mod settings;

pub use settings::{
    ApiKey, ConfigError, FanoutConfig, ProviderKind, ProviderSettings, ServerSettings,
    ServiceSettings,
};
