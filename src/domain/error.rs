//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for pitrader.
#[derive(Debug, thiserror::Error)]
pub enum PitraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown universe: {universe_id}")]
    UnknownUniverse { universe_id: String },

    #[error("universe {universe_id} has no snapshots")]
    EmptyTimeline { universe_id: String },

    #[error("invalid universe timeline for {universe_id}: {reason}")]
    InvalidTimeline { universe_id: String, reason: String },

    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("provider {provider} failed: {reason}")]
    ProviderFailure { provider: String, reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("no active symbols on {date}")]
    NoActiveSymbols { date: NaiveDate },

    #[error("no active symbol has price data on {date}")]
    NoPriceData { date: NaiveDate },

    #[error("dataset build cancelled ({fetched} symbols fetched, {remaining} remaining)")]
    Cancelled { fetched: usize, remaining: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PitraderError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        PitraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(section: &str, key: &str) -> Self {
        PitraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    /// Errors a caller must fix before retrying; never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PitraderError::ConfigParse { .. }
                | PitraderError::ConfigMissing { .. }
                | PitraderError::ConfigInvalid { .. }
                | PitraderError::UnknownUniverse { .. }
                | PitraderError::EmptyTimeline { .. }
                | PitraderError::InvalidTimeline { .. }
        )
    }
}

impl From<&PitraderError> for std::process::ExitCode {
    fn from(err: &PitraderError) -> Self {
        let code: u8 = match err {
            PitraderError::Io(_) | PitraderError::Json(_) => 1,
            PitraderError::ConfigParse { .. }
            | PitraderError::ConfigMissing { .. }
            | PitraderError::ConfigInvalid { .. }
            | PitraderError::UnknownUniverse { .. }
            | PitraderError::EmptyTimeline { .. }
            | PitraderError::InvalidTimeline { .. } => 2,
            PitraderError::Database { .. }
            | PitraderError::DatabaseQuery { .. }
            | PitraderError::ProviderFailure { .. } => 3,
            PitraderError::DataUnavailable { .. }
            | PitraderError::NoActiveSymbols { .. }
            | PitraderError::NoPriceData { .. } => 5,
            PitraderError::Cancelled { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
