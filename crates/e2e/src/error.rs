//! Error types for E2E testing

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use webcheck_common::ConfigError;

/// Resource level in the browser -> context -> page chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Engine,
    Browser,
    Context,
    Page,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Engine => "engine",
            ResourceKind::Browser => "browser",
            ResourceKind::Context => "context",
            ResourceKind::Page => "page",
        };
        f.write_str(name)
    }
}

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Aborts the whole session
    Session,
    /// Aborts the current test only
    Test,
}

impl ResourceKind {
    /// Engine and browser are shared by the session; context and page are per test
    pub fn scope(&self) -> Scope {
        match self {
            ResourceKind::Engine | ResourceKind::Browser => Scope::Session,
            ResourceKind::Context | ResourceKind::Page => Scope::Test,
        }
    }
}

/// Diagnostic artifact kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Video,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Screenshot => f.write_str("screenshot"),
            ArtifactKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Playwright not found. Install with: npx playwright install")]
    EngineUnavailable,

    #[error("Failed to acquire {resource}: {reason}")]
    ResourceAcquisition { resource: ResourceKind, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Failed to capture {artifact} at {}: {reason}", path.display())]
    ArtifactCapture {
        artifact: ArtifactKind,
        path: PathBuf,
        reason: String,
    },

    #[error("Teardown of {resource} failed: {reason}")]
    Teardown { resource: ResourceKind, reason: String },

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Timeout after {ms} ms waiting for: {what}")]
    Timeout { what: String, ms: u64 },

    #[error("Phase result error: {0}")]
    PhaseRecord(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl E2eError {
    pub fn acquisition(resource: ResourceKind, reason: impl fmt::Display) -> Self {
        E2eError::ResourceAcquisition {
            resource,
            reason: reason.to_string(),
        }
    }

    pub fn teardown(resource: ResourceKind, reason: impl fmt::Display) -> Self {
        E2eError::Teardown {
            resource,
            reason: reason.to_string(),
        }
    }

    /// Whether this error must terminate the run
    ///
    /// Only configuration failures and engine/browser acquisition failures
    /// escape the test that raised them.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            E2eError::Configuration(_) | E2eError::EngineUnavailable => true,
            E2eError::ResourceAcquisition { resource, .. } => resource.scope() == Scope::Session,
            _ => false,
        }
    }

    /// Whether this error is an ordinary test failure signal
    pub fn is_assertion(&self) -> bool {
        matches!(self, E2eError::AssertionFailed(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(E2eError::Configuration(ConfigError::Missing("API_BASE")).is_session_fatal());
        assert!(E2eError::acquisition(ResourceKind::Browser, "crashed").is_session_fatal());
        assert!(E2eError::acquisition(ResourceKind::Engine, "missing").is_session_fatal());
        assert!(!E2eError::acquisition(ResourceKind::Context, "denied").is_session_fatal());
        assert!(!E2eError::acquisition(ResourceKind::Page, "denied").is_session_fatal());
        assert!(!E2eError::AssertionFailed("nope".into()).is_session_fatal());
        assert!(!E2eError::teardown(ResourceKind::Context, "gone").is_session_fatal());
    }
}
