//! Browser driver seam
//!
//! The lifecycle manager talks to browsers only through these traits. The
//! Playwright backend implements them over a Node bridge process; the mock
//! backend implements them in memory for tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use webcheck_common::{BrowserKind, Viewport};

use crate::error::E2eResult;

/// Options for launching a browser process
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub headless: bool,
    /// Startup timeout, also used as the default per-action timeout
    pub timeout: Duration,
    pub slow_mo: Option<Duration>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: Duration::from_secs(30),
            slow_mo: None,
        }
    }
}

/// Options for creating an isolated browser context
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextConfig {
    pub viewport: Viewport,
    /// Directory receiving in-progress video recordings
    pub record_video_dir: Option<PathBuf>,
}

/// An in-progress video capture owned by a context
///
/// The file at `path` only exists once the owning context has been closed,
/// and may not exist at all if the browser produced no recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHandle {
    path: PathBuf,
}

impl RecordingHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the finalized recording is present on disk
    pub fn is_finalized(&self) -> bool {
        self.path.is_file()
    }
}

/// Capability to launch browsers of one kind
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> BrowserKind;

    async fn launch(&self, config: &LaunchConfig) -> E2eResult<Box<dyn BrowserDriver>>;
}

/// One running browser process
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(&self, config: &ContextConfig) -> E2eResult<Box<dyn ContextDriver>>;

    async fn close(&self) -> E2eResult<()>;
}

/// Isolated cookie/storage/recording scope
#[async_trait]
pub trait ContextDriver: Send + Sync {
    async fn new_page(&self) -> E2eResult<Box<dyn PageDriver>>;

    /// Recording bound to this context, if video capture is enabled
    fn recording(&self) -> Option<RecordingHandle>;

    /// Close the context; this finalizes any recording
    async fn close(&self) -> E2eResult<()>;
}

/// One navigable document view
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> E2eResult<()>;

    async fn set_content(&self, html: &str) -> E2eResult<()>;

    async fn click(&self, selector: &str) -> E2eResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()>;

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> E2eResult<()>;

    async fn dispatch_event(&self, selector: &str, event_type: &str) -> E2eResult<()>;

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()>;

    async fn close(&self) -> E2eResult<()>;
}
