//! In-memory browser backend
//!
//! Implements the driver traits without launching anything. Pages hold an
//! HTML string, screenshots are rendered to real PNG files and contexts with
//! a video directory write a placeholder `.webm` when closed. Live resource
//! counts and injected failures make it suitable for exercising the
//! lifecycle manager in tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use webcheck_common::{BrowserKind, Viewport};

use crate::driver::{
    BrowserDriver, ContextConfig, ContextDriver, Engine, LaunchConfig, PageDriver, RecordingHandle,
};
use crate::error::{E2eError, E2eResult};

/// Form served by the mock for any URL ending in `/upload`
pub const UPLOAD_FORM: &str = r#"<h3>File Uploader</h3>
<form method="POST" enctype="multipart/form-data" action="/upload">
  <input id="file-upload" type="file" name="file">
  <input id="file-submit" type="submit" value="Upload">
</form>
<div class="example" id="drag-drop-upload"></div>"#;

/// Placeholder recording bytes (EBML magic)
const WEBM_MAGIC: [u8; 4] = [0x1a, 0x45, 0xdf, 0xa3];

/// Failures to inject into the next matching operation
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub launch: bool,
    pub context: bool,
    pub page: bool,
    pub screenshot: bool,
    pub context_close: bool,
    pub page_close: bool,
    /// Close contexts without writing the recording file
    pub drop_recordings: bool,
    /// Never finish launching
    pub hang_launch: bool,
    /// Never finish creating a context
    pub hang_context: bool,
    /// Never finish a navigation
    pub hang_navigation: bool,
}

#[derive(Default)]
struct MockState {
    browsers: AtomicUsize,
    contexts: AtomicUsize,
    pages: AtomicUsize,
    next_id: AtomicU64,
    failures: Mutex<Failures>,
    launches: Mutex<Vec<LaunchConfig>>,
    context_configs: Mutex<Vec<ContextConfig>>,
}

impl MockState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory engine
#[derive(Clone)]
pub struct MockEngine {
    kind: BrowserKind,
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_kind(BrowserKind::Chromium)
    }

    pub fn with_kind(kind: BrowserKind) -> Self {
        Self {
            kind,
            state: Arc::new(MockState::default()),
        }
    }

    /// Replace the injected failures
    pub fn set_failures(&self, failures: Failures) {
        *self.state.failures.lock() = failures;
    }

    pub fn live_browsers(&self) -> usize {
        self.state.browsers.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        self.state.contexts.load(Ordering::SeqCst)
    }

    pub fn live_pages(&self) -> usize {
        self.state.pages.load(Ordering::SeqCst)
    }

    /// Launch options seen so far
    pub fn launches(&self) -> Vec<LaunchConfig> {
        self.state.launches.lock().clone()
    }

    /// Context options seen so far
    pub fn context_configs(&self) -> Vec<ContextConfig> {
        self.state.context_configs.lock().clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> BrowserKind {
        self.kind
    }

    async fn launch(&self, config: &LaunchConfig) -> E2eResult<Box<dyn BrowserDriver>> {
        let failures = self.state.failures.lock().clone();
        if failures.hang_launch {
            futures::future::pending::<()>().await;
        }
        if failures.launch {
            return Err(E2eError::Driver("mock browser refused to start".into()));
        }

        self.state.launches.lock().push(config.clone());
        self.state.browsers.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockBrowser {
            state: self.state.clone(),
        }))
    }
}

struct MockBrowser {
    state: Arc<MockState>,
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn new_context(&self, config: &ContextConfig) -> E2eResult<Box<dyn ContextDriver>> {
        let failures = self.state.failures.lock().clone();
        if failures.hang_context {
            futures::future::pending::<()>().await;
        }
        if failures.context {
            return Err(E2eError::Driver("mock context creation failed".into()));
        }

        let id = self.state.next_id();
        let recording = match &config.record_video_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some(RecordingHandle::new(dir.join(format!("mock-{}.webm", id))))
            }
            None => None,
        };

        self.state.context_configs.lock().push(config.clone());
        self.state.contexts.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockContext {
            state: self.state.clone(),
            viewport: config.viewport,
            recording,
        }))
    }

    async fn close(&self) -> E2eResult<()> {
        self.state.browsers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockContext {
    state: Arc<MockState>,
    viewport: Viewport,
    recording: Option<RecordingHandle>,
}

#[async_trait]
impl ContextDriver for MockContext {
    async fn new_page(&self) -> E2eResult<Box<dyn PageDriver>> {
        if self.state.failures.lock().page {
            return Err(E2eError::Driver("mock page creation failed".into()));
        }

        self.state.pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            state: self.state.clone(),
            viewport: self.viewport,
            document: Mutex::new(Document::default()),
        }))
    }

    fn recording(&self) -> Option<RecordingHandle> {
        self.recording.clone()
    }

    async fn close(&self) -> E2eResult<()> {
        self.state.contexts.fetch_sub(1, Ordering::SeqCst);

        let failures = self.state.failures.lock().clone();
        if failures.context_close {
            return Err(E2eError::Driver("mock context close failed".into()));
        }

        if let Some(recording) = &self.recording {
            if !failures.drop_recordings {
                let mut bytes = WEBM_MAGIC.to_vec();
                bytes.extend_from_slice(b"webcheck-mock-recording");
                std::fs::write(recording.path(), bytes)?;
            }
        }

        Ok(())
    }
}

#[derive(Default)]
struct Document {
    url: String,
    html: String,
    selected_files: Vec<PathBuf>,
    events: Vec<(String, String)>,
}

struct MockPage {
    state: Arc<MockState>,
    viewport: Viewport,
    document: Mutex<Document>,
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        let hang = self.state.failures.lock().hang_navigation;
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut doc = self.document.lock();
        doc.url = url.to_string();
        doc.html = if url.trim_end_matches('/').ends_with("/upload") {
            UPLOAD_FORM.to_string()
        } else {
            String::new()
        };
        doc.selected_files.clear();
        Ok(())
    }

    async fn set_content(&self, html: &str) -> E2eResult<()> {
        self.document.lock().html = html.to_string();
        Ok(())
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        let mut doc = self.document.lock();
        if !has_element(&doc.html, selector) {
            return Err(E2eError::Driver(format!("no element matches {}", selector)));
        }

        if selector == "#file-submit" {
            doc.html = match doc.selected_files.last() {
                Some(file) => {
                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    format!(
                        "<h3>File Uploaded!</h3>\n<div id=\"uploaded-files\">\n  {}\n</div>",
                        name
                    )
                }
                None => "<h1>Internal Server Error</h1>".to_string(),
            };
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, _value: &str) -> E2eResult<()> {
        let doc = self.document.lock();
        if !has_element(&doc.html, selector) {
            return Err(E2eError::Driver(format!("no element matches {}", selector)));
        }
        Ok(())
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> E2eResult<()> {
        let mut doc = self.document.lock();
        if !has_element(&doc.html, selector) {
            return Err(E2eError::Driver(format!("no element matches {}", selector)));
        }
        for file in files {
            if !file.exists() {
                return Err(E2eError::Driver(format!("file not found: {}", file.display())));
            }
        }
        doc.selected_files = files.to_vec();
        Ok(())
    }

    async fn dispatch_event(&self, selector: &str, event_type: &str) -> E2eResult<()> {
        self.document
            .lock()
            .events
            .push((selector.to_string(), event_type.to_string()));
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        Ok(find_text(&self.document.lock().html, selector))
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        if self.state.failures.lock().screenshot {
            return Err(E2eError::Driver("mock screenshot failed".into()));
        }

        let html = self.document.lock().html.clone();
        let lines = html.lines().count().max(1) as u32;
        let height = if full_page {
            self.viewport.height.max(lines * 20)
        } else {
            self.viewport.height
        };

        let shade = (html.len() % 200) as u8 + 40;
        let image = RgbaImage::from_pixel(self.viewport.width, height, Rgba([shade, shade, 255, 255]));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(path)?;
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        self.state.pages.fetch_sub(1, Ordering::SeqCst);
        if self.state.failures.lock().page_close {
            return Err(E2eError::Driver("mock page close failed".into()));
        }
        Ok(())
    }
}

/// Locate the opening tag matched by a `#id`, `tag` or `tag.class` selector
fn open_tag_end(html: &str, selector: &str) -> Option<usize> {
    let start = if let Some(id) = selector.strip_prefix('#') {
        html.find(&format!("id=\"{}\"", id))?
    } else {
        let (tag, class) = match selector.split_once('.') {
            Some((tag, class)) => (tag, Some(class)),
            None => (selector, None),
        };
        let opener = format!("<{}", tag);
        let mut offset = 0;
        loop {
            let found = offset + html[offset..].find(&opener)?;
            let rest = &html[found + opener.len()..];
            let boundary = rest.starts_with('>') || rest.starts_with(' ');
            let tag_src = &rest[..rest.find('>').unwrap_or(rest.len())];
            let class_ok = class.map_or(true, |c| tag_src.contains(&format!("class=\"{}\"", c)));
            if boundary && class_ok {
                break found;
            }
            offset = found + opener.len();
        }
    };

    html[start..].find('>').map(|i| start + i + 1)
}

fn has_element(html: &str, selector: &str) -> bool {
    selector == "body" || open_tag_end(html, selector).is_some()
}

fn find_text(html: &str, selector: &str) -> Option<String> {
    let content_start = open_tag_end(html, selector)?;
    let rest = &html[content_start..];
    let content = &rest[..rest.find('<').unwrap_or(rest.len())];
    Some(content.to_string())
}
