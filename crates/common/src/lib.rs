//! Webcheck Common Library
//!
//! Settings, structured logging and shared value types used by the
//! webcheck end-to-end harness.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{EnvSource, LogLayout, MapEnv, ProcessEnv, Settings, SettingsProvider};
pub use error::{ConfigError, Result};
pub use logging::{initialize_logging, LogHandle, LogRecord, RecordContext, StructuredLog};
pub use types::{BrowserKind, LogLevel, Viewport};

/// Webcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
