// Copyright the herald project contributors. All rights reserved.
//
// Use of this software is governed by the MIT License
// included in the LICENSE file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub const CONFIG_PATH_ENV_VAR: &str = "OUTBOX_CONFIG";

const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
const DEFAULT_ADVISORY_LOCK: i64 = 42;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_ATTEMPTS: i32 = 3;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Daemon configuration: a YAML file named by `OUTBOX_CONFIG`, overridden by
/// `OUTBOX_*` environment variables mapping dotted keys through `_`
/// (e.g. `relay.batch_size` -> `OUTBOX_RELAY_BATCH_SIZE`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayAppConfig {
    #[serde(default)]
    pub database_dsn: String,

    #[serde(default = "RelayAppConfig::default_nats_url")]
    pub nats_url: String,

    #[serde(default = "RelayAppConfig::default_advisory_lock")]
    pub advisory_lock: i64,

    #[serde(default)]
    pub relay: RelaySectionConfig,

    // `logging_level` is the spelling older deployments used
    #[serde(default, alias = "logging_level")]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for RelayAppConfig {
    fn default() -> Self {
        Self {
            database_dsn: String::new(),
            nats_url: Self::default_nats_url(),
            advisory_lock: Self::default_advisory_lock(),
            relay: RelaySectionConfig::default(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl RelayAppConfig {
    fn default_nats_url() -> String {
        DEFAULT_NATS_URL.to_string()
    }

    fn default_advisory_lock() -> i64 {
        DEFAULT_ADVISORY_LOCK
    }

    /// Reads the file named by `OUTBOX_CONFIG` (when set), applies
    /// environment overrides, and validates the result
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV_VAR) {
            Ok(path) => Self::load_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::CannotRead {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&content).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("OUTBOX_DATABASE_DSN") {
            self.database_dsn = v;
        }
        if let Some(v) = get("OUTBOX_NATS_URL") {
            self.nats_url = v;
        }
        if let Some(v) = get("OUTBOX_ADVISORY_LOCK") {
            self.advisory_lock = parse_override("OUTBOX_ADVISORY_LOCK", &v)?;
        }
        if let Some(v) = get("OUTBOX_RELAY_POLL_INTERVAL") {
            self.relay.poll_interval = parse_duration(&v).ok_or_else(|| {
                ConfigError::invalid_value("OUTBOX_RELAY_POLL_INTERVAL", &v)
            })?;
        }
        if let Some(v) = get("OUTBOX_RELAY_BATCH_SIZE") {
            self.relay.batch_size = parse_override("OUTBOX_RELAY_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("OUTBOX_RELAY_MAX_ATTEMPTS") {
            self.relay.max_attempts = parse_override("OUTBOX_RELAY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("OUTBOX_LOG_LEVEL").or_else(|| get("OUTBOX_LOGGING_LEVEL")) {
            self.log_level = parse_override("OUTBOX_LOG_LEVEL", &v)?;
        }
        if let Some(v) = get("OUTBOX_LOG_FORMAT") {
            self.log_format = parse_override("OUTBOX_LOG_FORMAT", &v)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_dsn.is_empty() {
            return Err(ConfigError::Missing {
                key: "database_dsn",
            });
        }
        if self.relay.poll_interval.is_zero() {
            return Err(ConfigError::invalid_value("relay.poll_interval", "0"));
        }
        if self.relay.batch_size == 0 {
            return Err(ConfigError::invalid_value("relay.batch_size", "0"));
        }
        if self.relay.max_attempts <= 0 {
            return Err(ConfigError::invalid_value(
                "relay.max_attempts",
                self.relay.max_attempts.to_string(),
            ));
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySectionConfig {
    #[serde(
        default = "RelaySectionConfig::default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    #[serde(default = "RelaySectionConfig::default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "RelaySectionConfig::default_max_attempts")]
    pub max_attempts: i32,
}

impl Default for RelaySectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RelaySectionConfig {
    fn default_poll_interval() -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    fn default_batch_size() -> usize {
        DEFAULT_BATCH_SIZE
    }

    fn default_max_attempts() -> i32 {
        DEFAULT_MAX_ATTEMPTS
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown log level '{s}'")),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format '{s}'")),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    CannotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse config file '{path}': {source}")]
    Malformed {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Config option '{key}' has invalid value '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Config option '{key}' is required")]
    Missing { key: &'static str },
}

impl ConfigError {
    fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_value(key, value))
}

/// Accepts `"250ms"`, `"5s"`, `"2m"`, or a bare integer meaning milliseconds
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    let (number, unit): (&str, fn(u64) -> Duration) = if let Some(n) = s.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| Duration::from_secs(m * 60))
    } else {
        (s, Duration::from_millis)
    };

    number.trim().parse::<u64>().ok().map(unit)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct DurationVisitor;

    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a duration string like '1000ms' or an integer of milliseconds")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Duration::from_millis)
                .map_err(|_| E::custom("duration cannot be negative"))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_duration(v).ok_or_else(|| E::custom(format!("invalid duration '{v}'")))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
