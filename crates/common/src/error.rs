//! Error types for webcheck configuration and logging

use thiserror::Error;

/// Result type alias using the configuration error
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while resolving settings or preparing log sinks
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid resolution {0:?}: expected WxH with positive integers")]
    InvalidResolution(String),

    #[error("Unknown browser: {0}")]
    UnknownBrowser(String),

    #[error("Logging already initialized")]
    LoggingInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
