//! Structured, append-only log sinks
//!
//! Events emitted through `tracing` are turned into [`LogRecord`]s and written
//! as one JSON object per line. Each [`LevelSink`] owns one file and decides
//! for itself which levels it accepts, so a `debug` sink never receives `info`
//! records and vice versa. Files are opened and closed for every record so a
//! killed run still leaves every completed line on disk.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{LogLayout, Settings};
use crate::error::{ConfigError, Result};
use crate::types::LogLevel;

/// Span field carrying the identity of the running test
pub const TEST_FIELD: &str = "test";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// One structured log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: String,
    pub level: String,
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
    pub message: String,
}

/// Where a record came from
#[derive(Debug, Clone, Default)]
pub struct RecordContext {
    pub test: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl RecordContext {
    pub fn for_test(test: impl Into<String>) -> Self {
        Self {
            test: Some(test.into()),
            ..Default::default()
        }
    }
}

/// How much of a record a sink writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Every field, including source location and elapsed time
    Full,
    /// Time, level, test, function and message
    Brief,
}

/// Which levels a sink accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    Exactly(LogLevel),
    All,
}

impl LevelFilter {
    pub fn accepts(&self, level: LogLevel) -> bool {
        match self {
            LevelFilter::Exactly(wanted) => *wanted == level,
            LevelFilter::All => true,
        }
    }
}

/// A single append-only JSON-lines file
#[derive(Debug)]
pub struct LevelSink {
    path: PathBuf,
    filter: LevelFilter,
    detail: Detail,
    // Serializes writers inside this process; O_APPEND handles the rest.
    lock: Mutex<()>,
}

impl LevelSink {
    pub fn new(path: PathBuf, filter: LevelFilter, detail: Detail) -> Self {
        Self {
            path,
            filter,
            detail,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn accepts(&self, level: LogLevel) -> bool {
        self.filter.accepts(level)
    }

    /// Append one record, opening and closing the file around the write
    pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let mut line = match self.detail {
            Detail::Full => serde_json::to_string(record)?,
            Detail::Brief => serde_json::to_string(&LogRecord {
                file: None,
                line: None,
                elapsed: None,
                ..record.clone()
            })?,
        };
        line.push('\n');

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

/// The set of sinks configured for this process
#[derive(Debug)]
pub struct StructuredLog {
    sinks: Vec<LevelSink>,
    started: Instant,
}

impl StructuredLog {
    /// Create the sinks for `layout` in `dir`, naming files with `stamp`
    pub fn new(dir: &Path, layout: &LogLayout, stamp: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let sinks = match layout {
            LogLayout::Combined => vec![LevelSink::new(
                dir.join(format!("log_{}.json", stamp)),
                LevelFilter::All,
                Detail::Full,
            )],
            LogLayout::PerLevel(levels) => levels
                .iter()
                .map(|level| {
                    // The info file stays readable: no source locations.
                    let detail = if *level >= LogLevel::Info {
                        Detail::Brief
                    } else {
                        Detail::Full
                    };
                    LevelSink::new(
                        dir.join(format!("{}_{}.json", level.as_str(), stamp)),
                        LevelFilter::Exactly(*level),
                        detail,
                    )
                })
                .collect(),
        };

        Ok(Self {
            sinks,
            started: Instant::now(),
        })
    }

    /// Timestamp suffix for a run starting now, second precision
    pub fn stamp_now() -> String {
        chrono::Local::now().format(STAMP_FORMAT).to_string()
    }

    pub fn sinks(&self) -> &[LevelSink] {
        &self.sinks
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.sinks.iter().map(|s| s.path.clone()).collect()
    }

    /// Whether any sink accepts `level`
    pub fn wants(&self, level: LogLevel) -> bool {
        self.sinks.iter().any(|s| s.accepts(level))
    }

    /// Build a record and append it to every sink accepting its level
    pub fn emit(&self, level: LogLevel, message: &str, context: &RecordContext) -> std::io::Result<()> {
        if !self.wants(level) {
            return Ok(());
        }

        let record = LogRecord {
            time: chrono::Local::now().format(TIME_FORMAT).to_string(),
            level: level.label().to_string(),
            test: context.test.clone().unwrap_or_else(|| "-".to_string()),
            function: context.function.clone(),
            file: context.file.clone(),
            line: context.line,
            elapsed: Some(format!("{:.3}s", self.started.elapsed().as_secs_f64())),
            message: message.to_string(),
        };

        let mut first_err = None;
        for sink in self.sinks.iter().filter(|s| s.accepts(level)) {
            if let Err(e) = sink.append(&record) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Test identity stored on spans that declare a `test` field
struct TestIdentity(String);

/// `tracing` layer feeding a [`StructuredLog`]
pub struct StructuredLayer {
    log: Arc<StructuredLog>,
}

impl StructuredLayer {
    pub fn new(log: Arc<StructuredLog>) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for StructuredLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = TestFieldVisitor::default();
        attrs.record(&mut visitor);

        if let (Some(test), Some(span)) = (visitor.test, ctx.span(id)) {
            span.extensions_mut().insert(TestIdentity(test));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = LogLevel::from(*meta.level());
        if !self.log.wants(level) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let test = ctx.event_scope(event).and_then(|scope| {
            scope
                .into_iter()
                .find_map(|span| span.extensions().get::<TestIdentity>().map(|t| t.0.clone()))
        });

        let context = RecordContext {
            test: test.or_else(|| Some(meta.target().to_string())),
            function: meta.module_path().map(str::to_string),
            file: meta.file().map(str::to_string),
            line: meta.line(),
        };

        if let Err(e) = self.log.emit(level, &visitor.finish(), &context) {
            // Nowhere else to report a broken log sink.
            eprintln!("structured log write failed: {}", e);
        }
    }
}

#[derive(Default)]
struct TestFieldVisitor {
    test: Option<String>,
}

impl Visit for TestFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == TEST_FIELD {
            self.test = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == TEST_FIELD {
            self.test = Some(format!("{:?}", value).trim_matches('"').to_string());
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Handle to the process-wide structured log
#[derive(Debug, Clone)]
pub struct LogHandle {
    log: Arc<StructuredLog>,
}

impl LogHandle {
    pub fn new(log: Arc<StructuredLog>) -> Self {
        Self { log }
    }

    /// Files written by this process
    pub fn paths(&self) -> Vec<PathBuf> {
        self.log.paths()
    }

    /// Append a record directly, bypassing `tracing`
    pub fn emit(&self, level: LogLevel, message: &str, context: &RecordContext) -> std::io::Result<()> {
        self.log.emit(level, message, context)
    }

    /// A fresh layer writing into the same sinks
    pub fn layer(&self) -> StructuredLayer {
        StructuredLayer::new(self.log.clone())
    }
}

/// Install console and structured logging for this process
///
/// Call once at startup. The console honours `RUST_LOG` when set and the
/// configured `LOG_LEVEL` otherwise; the structured sinks apply their own
/// per-level filters.
pub fn initialize_logging(settings: &Settings) -> Result<LogHandle> {
    let log = Arc::new(StructuredLog::new(
        &settings.log_dir,
        &settings.log_layout,
        &StructuredLog::stamp_now(),
    )?);
    let handle = LogHandle::new(log);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive()));

    tracing_subscriber::registry()
        .with(handle.layer().with_filter(quiet_dependencies()))
        .with(fmt::layer().with_filter(console_filter))
        .try_init()
        .map_err(|_| ConfigError::LoggingInitialized)?;

    Ok(handle)
}

/// Keep transport chatter out of the structured files
fn quiet_dependencies() -> Targets {
    Targets::new()
        .with_default(tracing::Level::TRACE)
        .with_target("hyper", tracing::Level::INFO)
        .with_target("h2", tracing::Level::INFO)
        .with_target("reqwest", tracing::Level::INFO)
        .with_target("mio", tracing::Level::INFO)
}
