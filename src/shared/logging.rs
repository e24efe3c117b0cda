//! Logging setup.
//!
//! The crate itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level.
    pub level: LogLevel,

    /// Log format.
    pub format: LogFormat,

    /// Whether to include the event target (module path).
    pub with_target: bool,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs
    Json,
    /// Pretty formatted logs
    Pretty,
    /// Compact formatted logs
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Install a global subscriber.
///
/// Fails with [`Error::Configuration`] when a global subscriber is already
/// set, including by an earlier call.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::new(config.level.directive());

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(config.with_target);

    let fmt_layer = match config.format {
        LogFormat::Json => fmt_layer.json().with_ansi(false).boxed(),
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Compact => fmt_layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::configuration(format!("Logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loads_from_json_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.with_target);
    }

    #[test]
    fn second_init_is_an_error() {
        let first = init_logging(LogConfig {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            with_target: false,
        });
        let second = init_logging(LogConfig::default());
        // Another test binary may already own the global subscriber.
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(Error::Configuration(_))));
    }
}
