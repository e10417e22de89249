//! Test-slot harness
//!
//! Drives each test unit through
//! `Created -> Setup -> Running -> Teardown -> ArtifactCapture -> Closed`.
//! Setup opens a context and one page, the body runs as the `call` phase,
//! and teardown captures diagnostics and closes everything the slot opened
//! before the next slot begins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use webcheck_common::Settings;

use crate::artifacts::ArtifactManager;
use crate::driver::{ContextConfig, Engine};
use crate::error::{E2eError, E2eResult, ResourceKind};
use crate::lifecycle::{acquire_engine, BrowserSession, ContextScope, OpenResources};
use crate::options::HarnessOptions;
use crate::outcome::{Outcome, OutcomeRecorder, Phase, PhaseResults, TestId};
use crate::page::Page;

/// States a test slot passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Created,
    Setup,
    Running,
    Teardown,
    ArtifactCapture,
    Closed,
}

/// Result of one test slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub phases: PhaseResults,
    pub states: Vec<SlotState>,
    pub screenshot: Option<PathBuf>,
    pub video: Option<PathBuf>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TestReport {
    fn new(test: &TestId) -> Self {
        Self {
            name: test.name().to_string(),
            phases: PhaseResults::default(),
            states: vec![SlotState::Created],
            screenshot: None,
            video: None,
            duration_ms: 0,
            error: None,
        }
    }

    fn enter(&mut self, state: SlotState) {
        self.states.push(state);
    }

    /// Outcome of the test as a whole
    ///
    /// A setup failure is an error; otherwise the `call` phase decides.
    /// Teardown never changes it.
    pub fn outcome(&self) -> Outcome {
        match (&self.phases.setup, &self.phases.call) {
            (Some(setup), _) if !setup.passed() => Outcome::Error,
            (_, Some(call)) => call.outcome,
            _ => Outcome::Error,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome() == Outcome::Passed
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub results: Vec<TestReport>,
}

impl SuiteReport {
    pub fn new(results: Vec<TestReport>, duration: Duration) -> Self {
        let count = |o: Outcome| results.iter().filter(|r| r.outcome() == o).count();
        let (passed, failed, errors) = (
            count(Outcome::Passed),
            count(Outcome::Failed),
            count(Outcome::Error),
        );

        Self {
            total: results.len(),
            passed,
            failed,
            errors,
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.passed == self.total
    }

    /// Write the report as JSON to `dir/test-results.json`
    pub fn write_results(&self, dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Owns the browser session and runs test slots against it
pub struct Harness {
    session: BrowserSession,
    recorder: OutcomeRecorder,
    artifacts: ArtifactManager,
    context_config: ContextConfig,
}

impl Harness {
    /// Launch the session browser and prepare the reports directory
    ///
    /// Errors here are session-fatal.
    pub async fn start(
        engine: Arc<dyn Engine>,
        options: &HarnessOptions,
        settings: &Settings,
    ) -> E2eResult<Self> {
        let artifacts = options.artifact_manager(settings);
        artifacts.prepare()?;

        let context_config = options.context_config(&artifacts);
        let session = BrowserSession::launch(engine, options.launch_config(settings)).await?;

        Ok(Self {
            session,
            recorder: OutcomeRecorder::new(),
            artifacts,
            context_config,
        })
    }

    /// Start against the Playwright engine selected by `--browser`
    pub async fn start_playwright(options: &HarnessOptions, settings: &Settings) -> E2eResult<Self> {
        let engine = acquire_engine(options.browser).await?;
        Self::start(engine, options, settings).await
    }

    pub fn recorder(&self) -> &OutcomeRecorder {
        &self.recorder
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn context_config(&self) -> &ContextConfig {
        &self.context_config
    }

    pub fn open_resources(&self) -> &OpenResources {
        self.session.open_resources()
    }

    /// Run one browser test
    ///
    /// `body` receives the slot's page. Whatever it does, the context and
    /// page are closed before this returns.
    pub async fn run_test<F>(&self, name: &str, body: F) -> TestReport
    where
        F: for<'p> FnOnce(&'p Page) -> BoxFuture<'p, E2eResult<()>>,
    {
        let test = TestId::new(name);
        let span = info_span!("test_unit", test = %test);
        self.run_slot(test, body).instrument(span).await
    }

    async fn run_slot<F>(&self, test: TestId, body: F) -> TestReport
    where
        F: for<'p> FnOnce(&'p Page) -> BoxFuture<'p, E2eResult<()>>,
    {
        if let Some(report) = reject_duplicate(&self.recorder, &test) {
            return report;
        }

        let started = Instant::now();
        let mut report = TestReport::new(&test);

        report.enter(SlotState::Setup);
        let (_, setup) = self
            .recorder
            .intercept(&test, Phase::Setup, self.open_scope(&test))
            .await;

        match setup {
            Ok(scope) => {
                report.enter(SlotState::Running);
                let page = scope.page();
                let call = async move {
                    match page {
                        Some(page) => body(page).await,
                        None => Err(E2eError::acquisition(ResourceKind::Page, "slot has no page")),
                    }
                };
                if let (_, Err(e)) = self.recorder.intercept(&test, Phase::Call, call).await {
                    report.error = Some(e.to_string());
                }

                report.enter(SlotState::Teardown);
                self.teardown(&test, scope, &mut report).await;
            }
            Err(e) => {
                report.error = Some(e.to_string());
                report.enter(SlotState::Teardown);
                let _ = self
                    .recorder
                    .intercept(&test, Phase::Teardown, async { Ok(()) })
                    .await;
            }
        }

        report.enter(SlotState::Closed);
        if self.open_resources().total() != 0 {
            warn!("{} resource(s) still open after {}", self.open_resources().total(), test);
        }

        report.phases = self.recorder.results(&test).unwrap_or_default();
        report.duration_ms = started.elapsed().as_millis() as u64;
        log_report(&report);
        report
    }

    async fn open_scope(&self, test: &TestId) -> E2eResult<ContextScope<'_>> {
        let mut scope = self.session.acquire_context(&self.context_config).await?;

        let page = scope.acquire_page().await.map(|_| ());
        if let Err(e) = page {
            let closed = scope.close().await;
            self.artifacts
                .finalize_recording(closed.recording.as_ref(), test, false);
            return Err(e);
        }
        Ok(scope)
    }

    async fn teardown(&self, test: &TestId, scope: ContextScope<'_>, report: &mut TestReport) {
        let failed = self.recorder.call_outcome(test) == Some(Outcome::Failed);
        let artifacts = &self.artifacts;
        let out = &mut *report;

        let teardown = async move {
            let recording = scope.recording();
            if failed || recording.is_some() {
                out.enter(SlotState::ArtifactCapture);
            }

            if failed {
                if let Some(page) = scope.page() {
                    out.screenshot = artifacts.capture_failure_screenshot(page, test).await;
                }
            }

            let closed = scope.close().await;
            out.video = artifacts.finalize_recording(closed.recording.as_ref(), test, !failed);

            match closed.errors.into_iter().next() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };

        let _ = self.recorder.intercept(test, Phase::Teardown, teardown).await;
    }

    /// Run one browser-less unit, such as an API test
    pub async fn run_unit<F, Fut>(&self, name: &str, body: F) -> TestReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = E2eResult<()>>,
    {
        run_unit_slot(&self.recorder, TestId::new(name), body).await
    }

    /// Close the browser, then release the engine
    pub async fn shutdown(self) {
        self.session.close().await;
    }
}

/// Run a browser-less unit through the phase interceptor
///
/// Used by [`Harness::run_unit`] and by suites that never launch a browser.
pub async fn run_unit_slot<F, Fut>(recorder: &OutcomeRecorder, test: TestId, body: F) -> TestReport
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = E2eResult<()>>,
{
    let span = info_span!("test_unit", test = %test);
    unit_slot(recorder, test, body).instrument(span).await
}

async fn unit_slot<F, Fut>(recorder: &OutcomeRecorder, test: TestId, body: F) -> TestReport
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = E2eResult<()>>,
{
    if let Some(report) = reject_duplicate(recorder, &test) {
        return report;
    }

    let started = Instant::now();
    let mut report = TestReport::new(&test);

    report.enter(SlotState::Setup);
    let _ = recorder.intercept(&test, Phase::Setup, async { Ok(()) }).await;

    report.enter(SlotState::Running);
    if let (_, Err(e)) = recorder.intercept(&test, Phase::Call, async move { body().await }).await {
        report.error = Some(e.to_string());
    }

    report.enter(SlotState::Teardown);
    let _ = recorder.intercept(&test, Phase::Teardown, async { Ok(()) }).await;
    report.enter(SlotState::Closed);

    report.phases = recorder.results(&test).unwrap_or_default();
    report.duration_ms = started.elapsed().as_millis() as u64;
    log_report(&report);
    report
}

/// A name that already has recorded phases cannot run again
///
/// Its phases would be rejected by the recorder and later phases would read
/// the earlier run's results, so the slot is refused before setup.
fn reject_duplicate(recorder: &OutcomeRecorder, test: &TestId) -> Option<TestReport> {
    recorder.results(test)?;

    let mut report = TestReport::new(test);
    report.error = Some(E2eError::PhaseRecord(format!("duplicate test name {}", test)).to_string());
    report.enter(SlotState::Closed);
    log_report(&report);
    Some(report)
}

fn log_report(report: &TestReport) {
    match report.outcome() {
        Outcome::Passed => info!("✓ {} ({} ms)", report.name, report.duration_ms),
        outcome => error!(
            "✗ {} [{:?}] - {}",
            report.name,
            outcome,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
