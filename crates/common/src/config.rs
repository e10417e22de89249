//! Environment-derived harness settings
//!
//! Settings are resolved once from an [`EnvSource`] and then shared as an
//! immutable `Arc<Settings>` through a [`SettingsProvider`].
//!
//! # Environment Variables
//!
//! | Variable | Description | Required |
//! |----------|-------------|----------|
//! | `API_BASE` | Root URL of the REST API under test | yes |
//! | `UI_BASE` | Root URL of the web UI under test | yes |
//! | `HEADLESS` | Launch the browser without a window | yes |
//! | `PLAYWRIGHT_TIMEOUT` | Browser launch / action timeout (ms) | yes |
//! | `PLAYWRIGHT_SLOWMO` | Delay inserted between browser operations (ms) | yes |
//! | `LOG_LEVEL` | Console and structured log severity | yes |
//! | `REPORTS_DIR` | Directory for reports and artifacts | no (`reports`) |
//! | `LOG_DIR` | Directory for structured log files | no (reports dir) |
//! | `LOG_LAYOUT` | `per-level` or `combined` log files | no (`per-level`) |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::types::LogLevel;

pub const ENV_API_BASE: &str = "API_BASE";
pub const ENV_UI_BASE: &str = "UI_BASE";
pub const ENV_HEADLESS: &str = "HEADLESS";
pub const ENV_TIMEOUT: &str = "PLAYWRIGHT_TIMEOUT";
pub const ENV_SLOWMO: &str = "PLAYWRIGHT_SLOWMO";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_REPORTS_DIR: &str = "REPORTS_DIR";
pub const ENV_LOG_DIR: &str = "LOG_DIR";
pub const ENV_LOG_LAYOUT: &str = "LOG_LAYOUT";

/// Default reports directory, relative to the working directory
pub const DEFAULT_REPORTS_DIR: &str = "reports";

/// Source of raw configuration values
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory environment, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for Arc<T> {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

impl<T: EnvSource + ?Sized> EnvSource for parking_lot::RwLock<T> {
    fn var(&self, key: &str) -> Option<String> {
        self.read().var(key)
    }
}

/// Structured log file layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLayout {
    /// One file per listed level: `<level>_<ts>.json`
    PerLevel(Vec<LogLevel>),
    /// A single `log_<ts>.json` with every record
    Combined,
}

impl Default for LogLayout {
    fn default() -> Self {
        LogLayout::PerLevel(vec![LogLevel::Debug, LogLevel::Info])
    }
}

/// Immutable harness settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// REST API root, e.g. `https://jsonplaceholder.typicode.com`
    pub api_base: String,
    /// UI root, e.g. `https://the-internet.herokuapp.com/`
    pub ui_base: String,
    /// Launch the browser headless
    pub headless: bool,
    /// Browser launch and per-action timeout
    pub launch_timeout: Duration,
    /// Slow-motion delay between browser operations
    pub slow_mo: Duration,
    /// Severity threshold for console logging
    pub log_level: LogLevel,
    /// Where reports, screenshots and videos land
    pub reports_dir: PathBuf,
    /// Where structured log files land
    pub log_dir: PathBuf,
    /// Structured log file layout
    pub log_layout: LogLayout,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_source(&ProcessEnv)
    }

    /// Resolve settings from an arbitrary source
    ///
    /// Every required key must be present and well-formed.
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let api_base = required(env, ENV_API_BASE)?;
        let ui_base = required(env, ENV_UI_BASE)?;
        let headless = parse_bool(ENV_HEADLESS, &required(env, ENV_HEADLESS)?)?;
        let launch_timeout = parse_millis(ENV_TIMEOUT, &required(env, ENV_TIMEOUT)?)?;
        let slow_mo = parse_millis(ENV_SLOWMO, &required(env, ENV_SLOWMO)?)?;

        let raw_level = required(env, ENV_LOG_LEVEL)?;
        let log_level = raw_level
            .parse::<LogLevel>()
            .map_err(|reason| ConfigError::invalid(ENV_LOG_LEVEL, &raw_level, reason))?;

        let reports_dir = optional(env, ENV_REPORTS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORTS_DIR));
        let log_dir = optional(env, ENV_LOG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| reports_dir.clone());

        let log_layout = match optional(env, ENV_LOG_LAYOUT) {
            None => LogLayout::default(),
            Some(raw) => parse_layout(&raw)?,
        };

        Ok(Self {
            api_base,
            ui_base,
            headless,
            launch_timeout,
            slow_mo,
            log_level,
            reports_dir,
            log_dir,
            log_layout,
        })
    }

    /// Directory for transient per-context recordings
    pub fn videos_dir(&self) -> PathBuf {
        self.reports_dir.join("videos")
    }

    /// Join a path onto the UI base URL
    pub fn ui_url(&self, path: &str) -> String {
        join_url(&self.ui_base, path)
    }

    /// Join a path onto the API base URL
    pub fn api_url(&self, path: &str) -> String {
        join_url(&self.api_base, path)
    }
}

/// Memoizing settings factory
///
/// Resolution happens at most once per provider; every later call, from any
/// thread, returns the same `Arc`. Environment changes after the first
/// successful call are not observed.
pub struct SettingsProvider {
    source: Box<dyn EnvSource>,
    cell: OnceCell<Arc<Settings>>,
}

impl SettingsProvider {
    pub fn new(source: impl EnvSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cell: OnceCell::new(),
        }
    }

    pub fn from_process_env() -> Self {
        Self::new(ProcessEnv)
    }

    /// Get the settings, resolving them on first access
    pub fn get(&self) -> Result<Arc<Settings>> {
        self.cell
            .get_or_try_init(|| {
                debug!("Resolving harness settings");
                Settings::from_source(self.source.as_ref()).map(Arc::new)
            })
            .cloned()
    }

    /// Whether settings have already been resolved
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for SettingsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsProvider")
            .field("resolved", &self.cell.get())
            .finish()
    }
}

fn required(env: &dyn EnvSource, key: &'static str) -> Result<String> {
    optional(env, key).ok_or(ConfigError::Missing(key))
}

fn optional(env: &dyn EnvSource, key: &'static str) -> Option<String> {
    env.var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected a boolean")),
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::invalid(key, raw, e.to_string()))
}

fn parse_layout(raw: &str) -> Result<LogLayout> {
    match raw.to_ascii_lowercase().as_str() {
        "per-level" | "per_level" | "split" => Ok(LogLayout::default()),
        "combined" | "single" => Ok(LogLayout::Combined),
        _ => Err(ConfigError::invalid(
            ENV_LOG_LAYOUT,
            raw,
            "expected per-level or combined",
        )),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
