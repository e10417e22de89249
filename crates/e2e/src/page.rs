//! Page handle handed to test bodies

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::driver::PageDriver;
use crate::error::{E2eError, E2eResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A page owned by a [`ContextScope`](crate::lifecycle::ContextScope)
///
/// Actions are bounded by the driver's own timeouts; `expect_*` assertions
/// poll until `timeout` elapses before failing.
pub struct Page {
    driver: Box<dyn PageDriver>,
    timeout: Duration,
}

impl Page {
    pub(crate) fn new(driver: Box<dyn PageDriver>, timeout: Duration) -> Self {
        Self { driver, timeout }
    }

    pub(crate) fn into_driver(self) -> Box<dyn PageDriver> {
        self.driver
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Navigate, failing with `Timeout` once the page timeout passes
    pub async fn goto(&self, url: &str) -> E2eResult<()> {
        debug!("goto {}", url);
        match tokio::time::timeout(self.timeout, self.driver.goto(url)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::Timeout {
                what: format!("navigation to {}", url),
                ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn set_content(&self, html: &str) -> E2eResult<()> {
        self.driver.set_content(html).await
    }

    pub async fn click(&self, selector: &str) -> E2eResult<()> {
        debug!("click {}", selector);
        self.driver.click(selector).await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.driver.fill(selector, value).await
    }

    pub async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> E2eResult<()> {
        debug!("set {} file(s) on {}", files.len(), selector);
        self.driver.set_input_files(selector, files).await
    }

    pub async fn dispatch_event(&self, selector: &str, event_type: &str) -> E2eResult<()> {
        self.driver.dispatch_event(selector, event_type).await
    }

    pub async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        self.driver.text_content(selector).await
    }

    pub async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.driver.screenshot(path, full_page).await
    }

    /// Wait until `selector` has exactly `expected` as its text
    ///
    /// Whitespace is normalized on both sides before comparing.
    pub async fn expect_text(&self, selector: &str, expected: &str) -> E2eResult<()> {
        let expected = normalize_whitespace(expected);
        let deadline = Instant::now() + self.timeout;

        loop {
            let actual = match self.driver.text_content(selector).await {
                Ok(text) => text.map(|t| normalize_whitespace(&t)),
                Err(E2eError::Timeout { .. }) => None,
                Err(e) => return Err(e),
            };

            if actual.as_deref() == Some(expected.as_str()) {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(E2eError::AssertionFailed(format!(
                    "expected {} to have text {:?}, found {:?}",
                    selector, expected, actual
                )));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until `selector` contains `fragment`
    pub async fn expect_text_contains(&self, selector: &str, fragment: &str) -> E2eResult<()> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let actual = match self.driver.text_content(selector).await {
                Ok(text) => text,
                Err(E2eError::Timeout { .. }) => None,
                Err(e) => return Err(e),
            };

            if actual.as_deref().is_some_and(|t| t.contains(fragment)) {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(E2eError::AssertionFailed(format!(
                    "expected {} to contain {:?}, found {:?}",
                    selector, fragment, actual
                )));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
