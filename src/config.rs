// Lexgate configuration
//
// One TOML file, one table per subsystem, every key optional. `LEXGATE_*`
// variables win over the file, and the merged result is validated before use.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::rate_limit::config::MAX_WINDOW_SECS;
use crate::rate_limit::RateLimitConfig;
use crate::session::validator::MAX_REVALIDATE_INTERVAL_SECS;
use crate::session::SessionConfig;
use crate::subscription::config::{MAX_RENEWAL_PERIOD_DAYS, MAX_RENEWAL_SWEEP_INTERVAL_SECS};
use crate::subscription::{StoreConfig, SubscriptionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Authentication rate limiting
    pub rate_limit: RateLimitConfig,

    /// Session revalidation
    pub session: SessionConfig,

    /// Plans, renewal and low-balance threshold
    pub subscription: SubscriptionConfig,

    /// Backing store behavior
    pub store: StoreConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Append logs to this file instead of stderr
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_file: None,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve the metrics endpoint
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Read `config_path()`, falling back to defaults when it is absent
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Parse `path`, layer `LEXGATE_*` variables on top and validate.
    ///
    /// A missing file is not an error; a malformed or out-of-range one is.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let parsed = match fs::read_to_string(path) {
            Ok(text) => {
                let parsed: Config = toml::from_str(&text)
                    .with_context(|| format!("Invalid TOML in {}", path.display()))?;
                tracing::info!(path = %path.display(), "Configuration loaded");
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read {}", path.display()));
            }
        };

        let config = parsed.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Platform config file, `~/.config/lexgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        match directories::ProjectDirs::from("com", "lexgate", "Lexgate") {
            Some(dirs) => dirs.config_dir().join("config.toml"),
            None => {
                let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home).join(".config/lexgate/config.toml")
            }
        }
    }

    /// Overlay `LEXGATE_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `LEXGATE_LOG_LEVEL` | `logging.level` |
    /// | `LEXGATE_LOG_FORMAT` | `logging.format` |
    /// | `LEXGATE_RATE_LIMIT_ENABLED` | `rate_limit.enabled` |
    /// | `LEXGATE_RATE_LIMIT_WINDOW_SECS` | `rate_limit.window_secs` |
    /// | `LEXGATE_RATE_LIMIT_MAX_ATTEMPTS` | `rate_limit.max_attempts` |
    /// | `LEXGATE_SESSION_REVALIDATE_SECS` | `session.revalidate_interval_secs` |
    /// | `LEXGATE_RENEWAL_PERIOD_DAYS` | `subscription.renewal_period_days` |
    /// | `LEXGATE_METRICS_ENABLED` | `metrics.enabled` |
    /// | `LEXGATE_METRICS_PORT` | `metrics.port` |
    ///
    /// Unparseable values and zero durations/counts leave the field untouched.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("LEXGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LEXGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(enabled) = env_parse("LEXGATE_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = enabled;
        }
        if let Some(secs) = env_nonzero("LEXGATE_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = secs;
        }
        if let Some(attempts) = env_nonzero("LEXGATE_RATE_LIMIT_MAX_ATTEMPTS") {
            self.rate_limit.max_attempts = attempts as u32;
        }
        if let Some(secs) = env_nonzero("LEXGATE_SESSION_REVALIDATE_SECS") {
            self.session.revalidate_interval_secs = secs;
        }
        if let Some(days) = env_nonzero("LEXGATE_RENEWAL_PERIOD_DAYS") {
            self.subscription.renewal_period_days = days as u32;
        }

        if let Some(enabled) = env_parse("LEXGATE_METRICS_ENABLED") {
            self.metrics.enabled = enabled;
        }
        if let Some(port) = env_parse("LEXGATE_METRICS_PORT") {
            self.metrics.port = port;
        }

        self
    }

    /// Reject values the subsystems cannot run with
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        const FORMATS: [&str; 3] = ["json", "pretty", "compact"];

        let level = self.logging.level.to_lowercase();
        ensure!(
            LEVELS.contains(&level.as_str()),
            "Invalid log level '{}', expected one of {}",
            self.logging.level,
            LEVELS.join("/")
        );
        let format = self.logging.format.to_lowercase();
        ensure!(
            FORMATS.contains(&format.as_str()),
            "Invalid log format '{}', expected one of {}",
            self.logging.format,
            FORMATS.join("/")
        );

        ensure!(
            (1..=MAX_WINDOW_SECS).contains(&self.rate_limit.window_secs),
            "rate_limit.window_secs must be between 1 and {}, got {}",
            MAX_WINDOW_SECS,
            self.rate_limit.window_secs
        );
        ensure!(self.rate_limit.max_attempts > 0, "rate_limit.max_attempts must be positive");
        ensure!(
            (1..=MAX_REVALIDATE_INTERVAL_SECS).contains(&self.session.revalidate_interval_secs),
            "session.revalidate_interval_secs must be between 1 and {}, got {}",
            MAX_REVALIDATE_INTERVAL_SECS,
            self.session.revalidate_interval_secs
        );

        let sub = &self.subscription;
        ensure!(
            (1..=MAX_RENEWAL_PERIOD_DAYS).contains(&sub.renewal_period_days),
            "subscription.renewal_period_days must be between 1 and {}, got {}",
            MAX_RENEWAL_PERIOD_DAYS,
            sub.renewal_period_days
        );
        ensure!(
            sub.low_balance_ratio > 0.0 && sub.low_balance_ratio < 1.0,
            "Low balance ratio must lie strictly between 0 and 1, got {}",
            sub.low_balance_ratio
        );
        ensure!(sub.debit_retry_limit > 0, "subscription.debit_retry_limit must be positive");
        ensure!(
            (1..=MAX_RENEWAL_SWEEP_INTERVAL_SECS).contains(&sub.renewal_sweep_interval_secs),
            "subscription.renewal_sweep_interval_secs must be between 1 and {}, got {}",
            MAX_RENEWAL_SWEEP_INTERVAL_SECS,
            sub.renewal_sweep_interval_secs
        );

        ensure!(self.metrics.port > 0, "metrics.port must be positive");
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .parse()
            .with_context(|| format!("Unknown log level '{}'", self.logging.level))
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_nonzero(name: &str) -> Option<u64> {
    env_parse::<u64>(name)
        .filter(|value| *value > 0)
        .filter(|value| *value <= u64::from(u32::MAX))
}
