use serde::{Deserialize, Serialize};

/// Configuration for the settlement engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
    /// Payment provider identifier used to key payment events (e.g. "mollie").
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Pending orders older than this many minutes are eligible for reaping.
    #[serde(default = "default_stale_order_max_age_minutes")]
    pub stale_order_max_age_minutes: u32,
    /// Maximum age of a webhook signature timestamp before it is rejected.
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
    /// Notification template key for order confirmations.
    #[serde(default = "default_confirmation_template")]
    pub confirmation_template: String,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            stale_order_max_age_minutes: default_stale_order_max_age_minutes(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
            confirmation_template: default_confirmation_template(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SettlementConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SettlementConfigBuilder {
        SettlementConfigBuilder::new()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_log_json(),
        }
    }
}

fn default_provider() -> String {
    "mollie".to_string()
}

fn default_stale_order_max_age_minutes() -> u32 {
    30
}

fn default_webhook_tolerance_seconds() -> i64 {
    300
}

fn default_confirmation_template() -> String {
    "order-confirmation".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    false
}

/// Builder for [`SettlementConfig`] with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct SettlementConfigBuilder {
    config: SettlementConfig,
}

impl SettlementConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SettlementConfig::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.provider = provider.into();
        self
    }

    pub fn with_stale_order_max_age_minutes(mut self, minutes: u32) -> Self {
        self.config.stale_order_max_age_minutes = minutes;
        self
    }

    pub fn with_webhook_tolerance_seconds(mut self, seconds: i64) -> Self {
        self.config.webhook_tolerance_seconds = seconds;
        self
    }

    pub fn with_confirmation_template(mut self, template: impl Into<String>) -> Self {
        self.config.confirmation_template = template.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Load overrides from `TURNSTILE_*` environment variables.
    ///
    /// Recognized: `TURNSTILE_PROVIDER`, `TURNSTILE_STALE_ORDER_MAX_AGE_MINUTES`,
    /// `TURNSTILE_WEBHOOK_TOLERANCE_SECONDS`, `TURNSTILE_LOG_LEVEL`,
    /// `TURNSTILE_LOG_JSON`. Unparseable values keep the current setting.
    pub fn from_env(mut self) -> Self {
        if let Ok(provider) = std::env::var("TURNSTILE_PROVIDER") {
            self.config.provider = provider;
        }
        if let Ok(minutes) = std::env::var("TURNSTILE_STALE_ORDER_MAX_AGE_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                self.config.stale_order_max_age_minutes = minutes;
            }
        }
        if let Ok(seconds) = std::env::var("TURNSTILE_WEBHOOK_TOLERANCE_SECONDS") {
            if let Ok(seconds) = seconds.parse() {
                self.config.webhook_tolerance_seconds = seconds;
            }
        }
        if let Ok(level) = std::env::var("TURNSTILE_LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Ok(json) = std::env::var("TURNSTILE_LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }
        self
    }

    pub fn build(self) -> SettlementConfig {
        self.config
    }
}

impl Default for SettlementConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SettlementConfig::default();
        assert_eq!(config.provider, "mollie");
        assert_eq!(config.stale_order_max_age_minutes, 30);
        assert_eq!(config.webhook_tolerance_seconds, 300);
        assert_eq!(config.confirmation_template, "order-confirmation");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_builder() {
        let config = SettlementConfigBuilder::new()
            .with_provider("stripe")
            .with_stale_order_max_age_minutes(15)
            .with_webhook_tolerance_seconds(60)
            .with_log_level("debug")
            .build();

        assert_eq!(config.provider, "stripe");
        assert_eq!(config.stale_order_max_age_minutes, 15);
        assert_eq!(config.webhook_tolerance_seconds, 60);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = SettlementConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SettlementConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.provider, config.provider);
        assert_eq!(
            parsed.stale_order_max_age_minutes,
            config.stale_order_max_age_minutes
        );
    }
}
