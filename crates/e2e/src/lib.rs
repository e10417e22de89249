//! Webcheck E2E Harness
//!
//! Browser and API test harness that:
//! - Launches one browser per run and an isolated context and page per test
//! - Records the outcome of every test phase (setup, call, teardown)
//! - Captures a full-page screenshot when the call phase fails
//! - Moves each context's video recording into the reports directory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Harness (per run)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserSession            (engine + browser, session-wide)  │
//! │    └── ContextScope<'s>    (context, per test)               │
//! │          └── Page          (page, per test)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_test(name, body)                                        │
//! │    ├── setup     -> acquire_context + acquire_page           │
//! │    ├── call      -> body(&Page)                              │
//! │    └── teardown  -> screenshot on failure, close, video      │
//! │  OutcomeRecorder  TestId -> { setup, call, teardown }        │
//! │  ArtifactManager  reports/<test>.png, reports/<test>.webm    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engine / BrowserDriver / ContextDriver / PageDriver         │
//! │    ├── playwright  (Node bridge over JSON lines)             │
//! │    └── mock        (in-memory, for tests)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod artifacts;
pub mod driver;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod mock;
pub mod options;
pub mod outcome;
pub mod page;
pub mod playwright;
pub mod schema;
pub mod upload;

pub use artifacts::{ArtifactManager, VideoRetention};
pub use driver::{ContextConfig, LaunchConfig, RecordingHandle};
pub use error::{E2eError, E2eResult, ResourceKind};
pub use harness::{Harness, SlotState, SuiteReport, TestReport};
pub use lifecycle::{acquire_engine, BrowserSession, ContextScope, OpenResources};
pub use options::HarnessOptions;
pub use outcome::{Outcome, OutcomeRecorder, Phase, PhaseResult, TestId};
pub use page::Page;
