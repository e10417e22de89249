//! Per-phase outcome capture
//!
//! Every test unit runs through `setup`, `call` and `teardown`. The
//! [`OutcomeRecorder`] wraps each phase, classifies how it ended and stores
//! exactly one [`PhaseResult`] per phase in an explicit map keyed by
//! [`TestId`]. Teardown logic reads the `call` result back from the same map
//! to decide which diagnostics to capture.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{E2eError, E2eResult};

/// Stable identity of one test unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(String);

impl TestId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the name, used for artifact file names
    pub fn file_stem(&self) -> String {
        let stem: String = self
            .0
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() || c.is_control() => '_',
                c => c,
            })
            .collect();

        if stem.is_empty() || stem.chars().all(|c| c == '.') {
            "unnamed".to_string()
        } else {
            stem
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution phase of a test unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Error,
}

impl Outcome {
    /// Any error in `call` is a test failure; in setup or teardown it is an error
    pub fn classify(phase: Phase, result: &E2eResult<impl Sized>) -> Self {
        match (result, phase) {
            (Ok(_), _) => Outcome::Passed,
            (Err(_), Phase::Call) => Outcome::Failed,
            (Err(_), _) => Outcome::Error,
        }
    }
}

/// Recorded result of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PhaseResult {
    pub fn new(phase: Phase, outcome: Outcome, duration: Duration, message: Option<String>) -> Self {
        Self {
            phase,
            outcome,
            duration_ms: duration.as_millis() as u64,
            message,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    pub fn failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// The three phase slots of one test unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResults {
    pub setup: Option<PhaseResult>,
    pub call: Option<PhaseResult>,
    pub teardown: Option<PhaseResult>,
}

impl PhaseResults {
    pub fn get(&self, phase: Phase) -> Option<&PhaseResult> {
        match phase {
            Phase::Setup => self.setup.as_ref(),
            Phase::Call => self.call.as_ref(),
            Phase::Teardown => self.teardown.as_ref(),
        }
    }

    fn slot(&mut self, phase: Phase) -> &mut Option<PhaseResult> {
        match phase {
            Phase::Setup => &mut self.setup,
            Phase::Call => &mut self.call,
            Phase::Teardown => &mut self.teardown,
        }
    }

    /// Latest phase recorded so far
    fn latest(&self) -> Option<Phase> {
        [Phase::Teardown, Phase::Call, Phase::Setup]
            .into_iter()
            .find(|p| self.get(*p).is_some())
    }
}

/// Phase results for every test unit in the process
#[derive(Debug, Clone, Default)]
pub struct OutcomeRecorder {
    results: Arc<Mutex<HashMap<TestId, PhaseResults>>>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result of one phase
    ///
    /// Each phase is recorded at most once, `setup` must come first and no
    /// phase may be recorded after a later one.
    pub fn record(&self, test: &TestId, result: PhaseResult) -> E2eResult<()> {
        let mut results = self.results.lock();
        let entry = results.entry(test.clone()).or_default();
        let phase = result.phase;

        if entry.get(phase).is_some() {
            return Err(E2eError::PhaseRecord(format!(
                "{} already recorded for {}",
                phase, test
            )));
        }
        if phase != Phase::Setup && entry.setup.is_none() {
            return Err(E2eError::PhaseRecord(format!(
                "{} recorded before setup for {}",
                phase, test
            )));
        }
        if let Some(latest) = entry.latest() {
            if latest > phase {
                return Err(E2eError::PhaseRecord(format!(
                    "{} recorded after {} for {}",
                    phase, latest, test
                )));
            }
        }

        debug!(test = %test, phase = %phase, outcome = ?result.outcome, "phase recorded");
        *entry.slot(phase) = Some(result);
        Ok(())
    }

    pub fn get(&self, test: &TestId, phase: Phase) -> Option<PhaseResult> {
        self.results
            .lock()
            .get(test)
            .and_then(|r| r.get(phase).cloned())
    }

    pub fn results(&self, test: &TestId) -> Option<PhaseResults> {
        self.results.lock().get(test).cloned()
    }

    /// Outcome of the `call` phase, which drives diagnostic capture
    pub fn call_outcome(&self, test: &TestId) -> Option<Outcome> {
        self.get(test, Phase::Call).map(|r| r.outcome)
    }

    /// Drop everything recorded for `test`
    pub fn forget(&self, test: &TestId) -> Option<PhaseResults> {
        self.results.lock().remove(test)
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one phase and record how it ended
    ///
    /// Normal returns, errors and panics are all recorded before this
    /// returns. A panic comes back as `AssertionFailed`.
    pub async fn intercept<T, F>(&self, test: &TestId, phase: Phase, fut: F) -> (PhaseResult, E2eResult<T>)
    where
        F: Future<Output = E2eResult<T>>,
    {
        let started = Instant::now();
        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(E2eError::AssertionFailed(panic_message(panic.as_ref()))),
        };

        let outcome = Outcome::classify(phase, &result);
        let message = result.as_ref().err().map(|e| e.to_string());
        let phase_result = PhaseResult::new(phase, outcome, started.elapsed(), message);

        if let Err(e) = self.record(test, phase_result.clone()) {
            error!("{}", e);
        }

        (phase_result, result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}
