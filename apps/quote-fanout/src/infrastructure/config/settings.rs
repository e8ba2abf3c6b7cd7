//! Fan-out Configuration Settings
//!
//! Configuration types for the quote fan-out service, loaded from
//! environment variables.

use std::time::Duration;

use crate::application::services::FanoutSettings;

/// Upstream quote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// In-process random walk, no network access.
    #[default]
    Simulated,
    /// Alpha Vantage `GLOBAL_QUOTE` endpoint.
    AlphaVantage,
}

impl ProviderKind {
    /// Parse provider kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "alphavantage" => Self::AlphaVantage,
            _ => Self::Simulated,
        }
    }

    /// Get the provider name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::AlphaVantage => "alphavantage",
        }
    }
}

/// Upstream API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap an API key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Quote provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider to build.
    pub kind: ProviderKind,
    /// API key, required for Alpha Vantage.
    pub api_key: Option<ApiKey>,
    /// Alpha Vantage base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Simulated,
            api_key: None,
            base_url: "https://www.alphavantage.co".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket server port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Maximum inbound message size in bytes.
    pub max_message_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            health_port: 8082,
            max_message_bytes: 16 * 1024,
        }
    }
}

/// Fan-out core settings.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Connection cap.
    pub max_connections: usize,
    /// Heartbeat sweep interval.
    pub heartbeat_interval: Duration,
    /// Per-symbol poll interval.
    pub poll_interval: Duration,
    /// Quiet time after which a subscription is stale.
    pub stale_threshold: Duration,
    /// Stale sweep interval.
    pub sweep_interval: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        let defaults = FanoutSettings::default();
        Self {
            max_connections: defaults.max_connections,
            heartbeat_interval: defaults.heartbeat_interval,
            poll_interval: defaults.poll_interval,
            stale_threshold: defaults.stale_threshold,
            sweep_interval: defaults.sweep_interval,
            outbound_buffer: defaults.outbound_buffer,
        }
    }
}

impl From<&ServiceSettings> for FanoutSettings {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            poll_interval: settings.poll_interval,
            heartbeat_interval: settings.heartbeat_interval,
            stale_threshold: settings.stale_threshold,
            sweep_interval: settings.sweep_interval,
            outbound_buffer: settings.outbound_buffer,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct FanoutConfig {
    /// Quote provider settings.
    pub provider: ProviderSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Fan-out core settings.
    pub service: ServiceSettings,
}

impl FanoutConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the Alpha Vantage provider is selected without
    /// an API key, a numeric setting is zero where that is meaningless, or
    /// the stale threshold does not cover one poll cycle.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`FanoutConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let provider_defaults = ProviderSettings::default();
        let server_defaults = ServerSettings::default();
        let service_defaults = ServiceSettings::default();

        let kind = env
            .get("QUOTE_PROVIDER")
            .map(|s| ProviderKind::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let api_key = env
            .get("ALPHA_VANTAGE_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(ApiKey::new);

        if kind == ProviderKind::AlphaVantage && api_key.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "ALPHA_VANTAGE_API_KEY".to_string(),
            ));
        }

        let provider = ProviderSettings {
            kind,
            api_key,
            base_url: env
                .get("ALPHA_VANTAGE_BASE_URL")
                .filter(|url| !url.trim().is_empty())
                .map_or(provider_defaults.base_url, |url| {
                    url.trim_end_matches('/').to_string()
                }),
            request_timeout: env.duration_secs(
                "QUOTE_FANOUT_PROVIDER_TIMEOUT_SECS",
                provider_defaults.request_timeout,
            ),
        };

        let server = ServerSettings {
            ws_port: env.parse("QUOTE_FANOUT_WS_PORT", server_defaults.ws_port),
            health_port: env.parse("QUOTE_FANOUT_HEALTH_PORT", server_defaults.health_port),
            max_message_bytes: env.parse(
                "QUOTE_FANOUT_MAX_MESSAGE_BYTES",
                server_defaults.max_message_bytes,
            ),
        };

        let service = ServiceSettings {
            max_connections: env.parse(
                "QUOTE_FANOUT_MAX_CONNECTIONS",
                service_defaults.max_connections,
            ),
            heartbeat_interval: env.duration_secs(
                "QUOTE_FANOUT_HEARTBEAT_INTERVAL_SECS",
                service_defaults.heartbeat_interval,
            ),
            poll_interval: env.duration_secs(
                "QUOTE_FANOUT_POLL_INTERVAL_SECS",
                service_defaults.poll_interval,
            ),
            stale_threshold: env.duration_secs(
                "QUOTE_FANOUT_STALE_THRESHOLD_SECS",
                service_defaults.stale_threshold,
            ),
            sweep_interval: env.duration_secs(
                "QUOTE_FANOUT_SWEEP_INTERVAL_SECS",
                service_defaults.sweep_interval,
            ),
            outbound_buffer: env.parse(
                "QUOTE_FANOUT_OUTBOUND_BUFFER",
                service_defaults.outbound_buffer,
            ),
        };

        let config = Self {
            provider,
            server,
            service,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("QUOTE_FANOUT_MAX_CONNECTIONS", self.service.max_connections == 0),
            (
                "QUOTE_FANOUT_HEARTBEAT_INTERVAL_SECS",
                self.service.heartbeat_interval.is_zero(),
            ),
            (
                "QUOTE_FANOUT_POLL_INTERVAL_SECS",
                self.service.poll_interval.is_zero(),
            ),
            (
                "QUOTE_FANOUT_SWEEP_INTERVAL_SECS",
                self.service.sweep_interval.is_zero(),
            ),
            ("QUOTE_FANOUT_OUTBOUND_BUFFER", self.service.outbound_buffer == 0),
            (
                "QUOTE_FANOUT_MAX_MESSAGE_BYTES",
                self.server.max_message_bytes == 0,
            ),
            (
                "QUOTE_FANOUT_PROVIDER_TIMEOUT_SECS",
                self.provider.request_timeout.is_zero(),
            ),
        ];

        if let Some((key, _)) = checks.iter().find(|(_, invalid)| *invalid) {
            return Err(ConfigError::ZeroValue((*key).to_string()));
        }

        // A subscriber receiving every tick must never look stale.
        let poll_cycle = self.service.poll_interval + self.provider.request_timeout;
        if self.service.stale_threshold <= poll_cycle {
            return Err(ConfigError::StaleThresholdTooShort {
                stale_threshold_secs: self.service.stale_threshold.as_secs(),
                poll_cycle_secs: poll_cycle.as_secs(),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Setting must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Stale threshold does not exceed poll interval plus provider timeout.
    #[error(
        "QUOTE_FANOUT_STALE_THRESHOLD_SECS ({stale_threshold_secs}s) must exceed poll interval plus provider timeout ({poll_cycle_secs}s)"
    )]
    StaleThresholdTooShort {
        /// Configured stale threshold.
        stale_threshold_secs: u64,
        /// Poll interval plus provider timeout.
        poll_cycle_secs: u64,
    },
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test_case("simulated", ProviderKind::Simulated ; "simulated")]
    #[test_case("alphavantage", ProviderKind::AlphaVantage ; "alphavantage")]
    #[test_case("Alpha_Vantage", ProviderKind::AlphaVantage ; "mixed case with underscore")]
    #[test_case("alpha-vantage", ProviderKind::AlphaVantage ; "hyphenated")]
    #[test_case("unknown", ProviderKind::Simulated ; "unknown falls back")]
    fn provider_kind_parsing(input: &str, expected: ProviderKind) {
        assert_eq!(ProviderKind::from_str_case_insensitive(input), expected);
    }

    #[test]
    fn defaults_without_environment() {
        let config = FanoutConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Simulated);
        assert_eq!(config.provider.base_url, "https://www.alphavantage.co");
        assert_eq!(config.provider.request_timeout, Duration::from_secs(10));
        assert_eq!(config.server.ws_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.server.max_message_bytes, 16_384);
        assert_eq!(config.service.max_connections, 100);
        assert_eq!(config.service.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.service.poll_interval, Duration::from_secs(5));
        assert_eq!(config.service.stale_threshold, Duration::from_secs(60));
        assert_eq!(config.service.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.service.outbound_buffer, 64);
    }

    #[test]
    fn overrides_are_applied() {
        let config = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_FANOUT_WS_PORT", "9000"),
            ("QUOTE_FANOUT_MAX_CONNECTIONS", "5"),
            ("QUOTE_FANOUT_POLL_INTERVAL_SECS", " 2 "),
            ("ALPHA_VANTAGE_BASE_URL", "http://localhost:1234/"),
        ]))
        .unwrap();

        assert_eq!(config.server.ws_port, 9000);
        assert_eq!(config.service.max_connections, 5);
        assert_eq!(config.service.poll_interval, Duration::from_secs(2));
        assert_eq!(config.provider.base_url, "http://localhost:1234");
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_FANOUT_WS_PORT", "not-a-port"),
            ("QUOTE_FANOUT_HEARTBEAT_INTERVAL_SECS", "-3"),
        ]))
        .unwrap();

        assert_eq!(config.server.ws_port, 8080);
        assert_eq!(config.service.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn alpha_vantage_requires_key() {
        let err =
            FanoutConfig::from_lookup(lookup(&[("QUOTE_PROVIDER", "alphavantage")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "ALPHA_VANTAGE_API_KEY"));

        let err = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_PROVIDER", "alphavantage"),
            ("ALPHA_VANTAGE_API_KEY", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));

        let config = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_PROVIDER", "alphavantage"),
            ("ALPHA_VANTAGE_API_KEY", "demo"),
        ]))
        .unwrap();
        assert_eq!(config.provider.api_key.unwrap().expose(), "demo");
    }

    #[test_case("QUOTE_FANOUT_POLL_INTERVAL_SECS" ; "poll interval")]
    #[test_case("QUOTE_FANOUT_HEARTBEAT_INTERVAL_SECS" ; "heartbeat interval")]
    #[test_case("QUOTE_FANOUT_SWEEP_INTERVAL_SECS" ; "sweep interval")]
    #[test_case("QUOTE_FANOUT_MAX_CONNECTIONS" ; "max connections")]
    #[test_case("QUOTE_FANOUT_OUTBOUND_BUFFER" ; "outbound buffer")]
    #[test_case("QUOTE_FANOUT_PROVIDER_TIMEOUT_SECS" ; "provider timeout")]
    fn zero_values_are_rejected(key: &str) {
        let err = FanoutConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroValue(ref k) if k == key));
    }

    #[test_case("120", "60", "10" ; "poll interval longer than threshold")]
    #[test_case("60", "60", "10" ; "poll interval equal to threshold")]
    #[test_case("5", "15", "10" ; "threshold equal to poll cycle")]
    #[test_case("5", "12", "10" ; "timeout pushes cycle past threshold")]
    fn stale_threshold_must_exceed_poll_cycle(poll: &str, stale: &str, timeout: &str) {
        let err = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_FANOUT_POLL_INTERVAL_SECS", poll),
            ("QUOTE_FANOUT_STALE_THRESHOLD_SECS", stale),
            ("QUOTE_FANOUT_PROVIDER_TIMEOUT_SECS", timeout),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::StaleThresholdTooShort { .. }));
    }

    #[test]
    fn stale_threshold_just_above_poll_cycle_is_accepted() {
        let config = FanoutConfig::from_lookup(lookup(&[
            ("QUOTE_FANOUT_POLL_INTERVAL_SECS", "5"),
            ("QUOTE_FANOUT_STALE_THRESHOLD_SECS", "16"),
            ("QUOTE_FANOUT_PROVIDER_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.service.stale_threshold, Duration::from_secs(16));
    }

    #[test]
    fn api_key_redacted_debug() {
        let settings = ProviderSettings {
            api_key: Some(ApiKey::new("secret123".to_string())),
            ..ProviderSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn service_settings_convert_to_fanout_settings() {
        let service = ServiceSettings {
            max_connections: 7,
            ..ServiceSettings::default()
        };
        let fanout = FanoutSettings::from(&service);
        assert_eq!(fanout.max_connections, 7);
        assert_eq!(fanout.poll_interval, Duration::from_secs(5));
    }
}
