//! Structured logging setup.
//!
//! Diagnostics go to stderr through `tracing`, in one of three formats:
//! - **pretty**: multi-line, human readable
//! - **json**: one JSON object per event, for log collection
//! - **compact**: single line per event

use crate::ports::config_port::ConfigPort;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Pretty,
    Json,
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `pitrader::domain=debug`.
    pub level: String,
    pub format: LogFormat,
    pub with_file: bool,
    pub with_thread_ids: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            with_file: false,
            with_thread_ids: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Reads the `[logging]` section. Environment variables still win for
    /// anything they set.
    pub fn from_config(config: &dyn ConfigPort) -> Self {
        let defaults = Self::default();
        let level = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| config.get_string("logging", "level"))
            .unwrap_or(defaults.level);
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .or_else(|| config.get_string("logging", "format"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.format);
        Self {
            level,
            format,
            with_file: config.get_bool("logging", "with_file", defaults.with_file),
            with_thread_ids: config.get_bool("logging", "with_thread_ids", defaults.with_thread_ids),
            with_target: config.get_bool("logging", "with_target", defaults.with_target),
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level)?;

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}
