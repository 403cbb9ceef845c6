//! Configuration management with profile support.
//!
//! Provides the runtime configuration for the liquidator with support for
//! profiles (default, testing, production), TOML files and environment
//! overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variables read by [`BotConfig::from_env`].
pub mod env {
    pub const BOT_PROFILE: &str = "BOT_PROFILE";
    pub const PRICE_FEED_INTERVAL: &str = "PRICE_FEED_INTERVAL";
    pub const FULL_ACCOUNT_INTERVAL: &str = "FULL_ACCOUNT_INTERVAL";
    pub const EXCHANGE_INTERVAL: &str = "EXCHANGE_INTERVAL";
    pub const MARGIN_PERCENTAGE_WATCH: &str = "MARGIN_PERCENTAGE_WATCH";
    pub const ENABLE_LOGGING: &str = "ENABLE_LOGGING";
    pub const REFRESH_MAX_ATTEMPTS: &str = "REFRESH_MAX_ATTEMPTS";
}

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Refresh cadences
    #[serde(default)]
    pub scanner: ScannerTimingConfig,

    /// At-risk classification
    #[serde(default)]
    pub risk: RiskConfig,

    /// Retry policy for cache refreshes
    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Scanner timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerTimingConfig {
    /// Price feed / at-risk re-check interval and loop cadence (milliseconds)
    #[serde(default = "default_price_feed_interval")]
    pub price_feed_interval_ms: u64,

    /// Full margin account rescan interval (milliseconds)
    #[serde(default = "default_full_account_interval")]
    pub full_account_interval_ms: u64,

    /// Exchange and market configuration refresh interval (milliseconds)
    #[serde(default = "default_exchange_interval")]
    pub exchange_interval_ms: u64,
}

fn default_price_feed_interval() -> u64 {
    300
}
fn default_full_account_interval() -> u64 {
    300_000
}
fn default_exchange_interval() -> u64 {
    60_000
}

impl Default for ScannerTimingConfig {
    fn default() -> Self {
        Self {
            price_feed_interval_ms: default_price_feed_interval(),
            full_account_interval_ms: default_full_account_interval(),
            exchange_interval_ms: default_exchange_interval(),
        }
    }
}

impl ScannerTimingConfig {
    pub fn price_feed_interval(&self) -> Duration {
        Duration::from_millis(self.price_feed_interval_ms)
    }
    pub fn full_account_interval(&self) -> Duration {
        Duration::from_millis(self.full_account_interval_ms)
    }
    pub fn exchange_interval(&self) -> Duration {
        Duration::from_millis(self.exchange_interval_ms)
    }
}

/// At-risk classification thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Percentage points added to margin utilization before comparing to 1
    #[serde(default = "default_margin_percentage_watch")]
    pub margin_percentage_watch: u32,
}

fn default_margin_percentage_watch() -> u32 {
    10
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            margin_percentage_watch: default_margin_percentage_watch(),
        }
    }
}

/// Retry policy applied to each cache refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Attempts per refresh; 1 fails fast
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay (milliseconds)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_base_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    5_000
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RefreshConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit the status report after every tick
    #[serde(default)]
    pub enable_status: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scanner: ScannerTimingConfig::default(),
            risk: RiskConfig::default(),
            refresh: RefreshConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(&expand_env(content))?)
    }

    /// Create a testing profile with fast cadences and a wide watch band.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scanner: ScannerTimingConfig {
                price_feed_interval_ms: 1_000,
                full_account_interval_ms: 30_000,
                exchange_interval_ms: 10_000,
            },
            risk: RiskConfig {
                margin_percentage_watch: 25,
            },
            refresh: RefreshConfig::default(),
            logging: LoggingConfig { enable_status: true },
        }
    }

    /// Create a production profile that retries transient refresh failures.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scanner: ScannerTimingConfig::default(),
            risk: RiskConfig::default(),
            refresh: RefreshConfig {
                max_attempts: 3,
                base_delay_ms: 250,
                max_delay_ms: 2_000,
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Select a profile by name. Unknown names fall back to the default.
    pub fn profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Profile from BOT_PROFILE, then individual environment overrides.
    pub fn from_env() -> Result<Self> {
        let profile = std::env::var(env::BOT_PROFILE).unwrap_or_else(|_| "default".to_string());
        let mut config = Self::profile(&profile);
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (variable name to value).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ms) = parse_var(&lookup, env::PRICE_FEED_INTERVAL)? {
            self.scanner.price_feed_interval_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, env::FULL_ACCOUNT_INTERVAL)? {
            self.scanner.full_account_interval_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, env::EXCHANGE_INTERVAL)? {
            self.scanner.exchange_interval_ms = ms;
        }
        if let Some(watch) = parse_var(&lookup, env::MARGIN_PERCENTAGE_WATCH)? {
            self.risk.margin_percentage_watch = watch;
        }
        if let Some(attempts) = parse_var(&lookup, env::REFRESH_MAX_ATTEMPTS)? {
            self.refresh.max_attempts = attempts;
        }
        if let Some(value) = lookup(env::ENABLE_LOGGING) {
            self.logging.enable_status = matches!(value.trim(), "true" | "1");
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            price_feed_interval_ms = self.scanner.price_feed_interval_ms,
            full_account_interval_ms = self.scanner.full_account_interval_ms,
            exchange_interval_ms = self.scanner.exchange_interval_ms,
            "Scanner timing"
        );
        tracing::info!(
            margin_percentage_watch = self.risk.margin_percentage_watch,
            "Risk thresholds"
        );
        tracing::info!(
            max_attempts = self.refresh.max_attempts,
            base_delay_ms = self.refresh.base_delay_ms,
            max_delay_ms = self.refresh.max_delay_ms,
            status_logging = self.logging.enable_status,
            "Refresh policy"
        );
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))
        })
        .transpose()
}

/// Expand ${VAR_NAME} patterns with environment variable values.
pub(crate) fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.scanner.price_feed_interval(), Duration::from_millis(300));
        assert_eq!(config.scanner.full_account_interval(), Duration::from_secs(300));
        assert_eq!(config.risk.margin_percentage_watch, 10);
        assert_eq!(config.refresh.max_attempts, 1);
        assert!(!config.logging.enable_status);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(BotConfig::profile("prod").profile, "production");
        assert!(BotConfig::production().refresh.max_attempts > 1);
        assert_eq!(BotConfig::profile("TESTING"), BotConfig::testing());
        assert_eq!(BotConfig::profile("unknown"), BotConfig::default());
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            (env::PRICE_FEED_INTERVAL, "500"),
            (env::FULL_ACCOUNT_INTERVAL, "60000"),
            (env::MARGIN_PERCENTAGE_WATCH, " 15 "),
            (env::ENABLE_LOGGING, "true"),
        ]);
        let mut config = BotConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.scanner.price_feed_interval_ms, 500);
        assert_eq!(config.scanner.full_account_interval_ms, 60_000);
        assert_eq!(config.scanner.exchange_interval_ms, 60_000);
        assert_eq!(config.risk.margin_percentage_watch, 15);
        assert!(config.logging.enable_status);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let mut config = BotConfig::default();
        let err = config
            .apply_overrides(|name| (name == env::PRICE_FEED_INTERVAL).then(|| "fast".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(env::PRICE_FEED_INTERVAL));
    }

    #[test]
    fn test_serialization() {
        let config = BotConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));

        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_with_env() {
        std::env::set_var("BOT_CONFIG_TEST_WATCH", "20");
        let config = BotConfig::from_toml(
            r#"
            [risk]
            margin_percentage_watch = ${BOT_CONFIG_TEST_WATCH}
            "#,
        )
        .unwrap();
        std::env::remove_var("BOT_CONFIG_TEST_WATCH");

        assert_eq!(config.risk.margin_percentage_watch, 20);
        assert_eq!(config.scanner, ScannerTimingConfig::default());
        assert_eq!(config.profile, "default");
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("BOT_EXPAND_TEST_VAR", "test_value");
        assert_eq!(expand_env("${BOT_EXPAND_TEST_VAR}"), "test_value");
        assert_eq!(expand_env("prefix_${BOT_EXPAND_TEST_VAR}_suffix"), "prefix_test_value_suffix");
        assert_eq!(expand_env("${BOT_EXPAND_MISSING}"), "${BOT_EXPAND_MISSING}");
        std::env::remove_var("BOT_EXPAND_TEST_VAR");
    }
}
