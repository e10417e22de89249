//! Browser resource lifecycle
//!
//! Resources form a strictly nested chain:
//!
//! ```text
//! Engine ──> BrowserSession ──> ContextScope<'s> ──> Page
//!  (session)     (session)          (per test)      (per test)
//! ```
//!
//! A [`ContextScope`] borrows its [`BrowserSession`], so the session cannot be
//! closed while a context is alive, and it owns its pages, so pages are
//! always released before their context. Every guard has an explicit async
//! `close`; dropping an unclosed guard logs a warning and closes it in the
//! background so nothing leaks on early returns or panics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use webcheck_common::BrowserKind;

use crate::driver::{BrowserDriver, ContextConfig, ContextDriver, Engine, LaunchConfig, RecordingHandle};
use crate::error::{E2eError, E2eResult, ResourceKind};
use crate::page::Page;
use crate::playwright::PlaywrightEngine;

/// Count of per-test resources currently held by the lifecycle manager
#[derive(Debug, Default)]
pub struct OpenResources {
    contexts: AtomicUsize,
    pages: AtomicUsize,
}

impl OpenResources {
    pub fn contexts(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.contexts() + self.pages()
    }

    fn release_pages(&self, n: usize) {
        self.pages.fetch_sub(n, Ordering::SeqCst);
    }
}

/// Acquire the Playwright engine for `kind`
///
/// Fails with a session-fatal error when Playwright is not installed.
pub async fn acquire_engine(kind: BrowserKind) -> E2eResult<Arc<dyn Engine>> {
    let engine = PlaywrightEngine::new(kind).await?;
    info!("Using Playwright engine ({})", kind);
    Ok(Arc::new(engine))
}

/// Session-scoped browser, shared read-only by every test
pub struct BrowserSession {
    engine: Arc<dyn Engine>,
    browser: Option<Box<dyn BrowserDriver>>,
    open: Arc<OpenResources>,
    timeout: Duration,
}

impl BrowserSession {
    /// Launch a browser from `engine`
    ///
    /// Any failure, including exceeding `config.timeout`, is a session-fatal
    /// acquisition error; there is no retry.
    pub async fn launch(engine: Arc<dyn Engine>, config: LaunchConfig) -> E2eResult<Self> {
        let launched = tokio::time::timeout(config.timeout, engine.launch(&config)).await;

        let browser = match launched {
            Ok(Ok(browser)) => browser,
            Ok(Err(e)) if e.is_session_fatal() => return Err(e),
            Ok(Err(e)) => return Err(E2eError::acquisition(ResourceKind::Browser, e)),
            Err(_) => {
                return Err(E2eError::acquisition(
                    ResourceKind::Browser,
                    format!("browser did not start within {:?}", config.timeout),
                ))
            }
        };

        info!("Browser session started ({})", engine.kind());
        Ok(Self {
            engine,
            browser: Some(browser),
            open: Arc::new(OpenResources::default()),
            timeout: config.timeout,
        })
    }

    pub fn kind(&self) -> BrowserKind {
        self.engine.kind()
    }

    pub fn open_resources(&self) -> &OpenResources {
        &self.open
    }

    /// Create an isolated context for one test
    ///
    /// Failure is scoped to the calling test.
    pub async fn acquire_context(&self, config: &ContextConfig) -> E2eResult<ContextScope<'_>> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| E2eError::acquisition(ResourceKind::Context, "browser already closed"))?;

        let driver = match tokio::time::timeout(self.timeout, browser.new_context(config)).await {
            Ok(Ok(driver)) => driver,
            Ok(Err(e)) => return Err(E2eError::acquisition(ResourceKind::Context, e)),
            Err(_) => {
                return Err(E2eError::acquisition(
                    ResourceKind::Context,
                    format!("context not created within {:?}", self.timeout),
                ))
            }
        };

        self.open.contexts.fetch_add(1, Ordering::SeqCst);
        debug!("Context opened (viewport {})", config.viewport);

        Ok(ContextScope {
            session: self,
            driver: Some(driver),
            pages: Vec::new(),
        })
    }

    /// Close the browser
    ///
    /// Errors are logged, never returned. The borrow held by every
    /// `ContextScope` guarantees no context outlives this call.
    pub async fn close(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let Some(browser) = self.browser.take() else {
            return;
        };

        if self.open.total() != 0 {
            warn!(
                "Closing browser with {} context(s) and {} page(s) still open",
                self.open.contexts(),
                self.open.pages()
            );
        }

        match tokio::time::timeout(self.timeout, browser.close()).await {
            Ok(Ok(())) => info!("Browser session closed"),
            Ok(Err(e)) => warn!("{}", E2eError::teardown(ResourceKind::Browser, e)),
            Err(_) => warn!("{}", E2eError::teardown(ResourceKind::Browser, "close timed out")),
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.take() {
            warn!("Browser session dropped without close");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = browser.close().await {
                        warn!("{}", E2eError::teardown(ResourceKind::Browser, e));
                    }
                });
            }
        }
    }
}

/// Outcome of closing a context
#[derive(Debug, Default)]
pub struct ContextClosed {
    /// Recording that was bound to the context, now finalizable
    pub recording: Option<RecordingHandle>,
    /// Errors raised while closing; already logged
    pub errors: Vec<E2eError>,
}

impl ContextClosed {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-test context and the pages it owns
pub struct ContextScope<'s> {
    session: &'s BrowserSession,
    driver: Option<Box<dyn ContextDriver>>,
    pages: Vec<Page>,
}

impl<'s> ContextScope<'s> {
    /// Open a new page in this context
    pub async fn acquire_page(&mut self) -> E2eResult<&Page> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| E2eError::acquisition(ResourceKind::Page, "context already closed"))?;

        let timeout = self.session.timeout;
        let page = match tokio::time::timeout(timeout, driver.new_page()).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return Err(E2eError::acquisition(ResourceKind::Page, e)),
            Err(_) => {
                return Err(E2eError::acquisition(
                    ResourceKind::Page,
                    format!("page not created within {:?}", timeout),
                ))
            }
        };

        self.session.open.pages.fetch_add(1, Ordering::SeqCst);
        self.pages.push(Page::new(page, timeout));

        let index = self.pages.len() - 1;
        Ok(&self.pages[index])
    }

    /// The first page opened in this context
    pub fn page(&self) -> Option<&Page> {
        self.pages.first()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn recording(&self) -> Option<RecordingHandle> {
        self.driver.as_ref().and_then(|d| d.recording())
    }

    /// Close pages (newest first), then the context
    ///
    /// Never fails: errors are logged and returned for inspection. Closing
    /// the context finalizes its recording.
    pub async fn close(mut self) -> ContextClosed {
        let mut closed = ContextClosed::default();
        let Some(driver) = self.driver.take() else {
            return closed;
        };

        let timeout = self.session.timeout;
        let pages = std::mem::take(&mut self.pages);
        let page_count = pages.len();

        for page in pages.into_iter().rev() {
            let page = page.into_driver();
            match tokio::time::timeout(timeout, page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => closed.errors.push(E2eError::teardown(ResourceKind::Page, e)),
                Err(_) => closed.errors.push(E2eError::teardown(ResourceKind::Page, "close timed out")),
            }
        }
        self.session.open.release_pages(page_count);

        closed.recording = driver.recording();
        match tokio::time::timeout(timeout, driver.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => closed.errors.push(E2eError::teardown(ResourceKind::Context, e)),
            Err(_) => closed.errors.push(E2eError::teardown(ResourceKind::Context, "close timed out")),
        }
        self.session.open.contexts.fetch_sub(1, Ordering::SeqCst);

        for error in &closed.errors {
            warn!("{}", error);
        }
        debug!("Context closed ({} page(s))", page_count);

        closed
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        warn!("Context dropped without close; closing in background");
        let pages: Vec<_> = std::mem::take(&mut self.pages)
            .into_iter()
            .map(Page::into_driver)
            .collect();
        self.session.open.release_pages(pages.len());
        self.session.open.contexts.fetch_sub(1, Ordering::SeqCst);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for page in pages.into_iter().rev() {
                    if let Err(e) = page.close().await {
                        warn!("{}", E2eError::teardown(ResourceKind::Page, e));
                    }
                }
                if let Err(e) = driver.close().await {
                    warn!("{}", E2eError::teardown(ResourceKind::Context, e));
                }
            });
        }
    }
}
