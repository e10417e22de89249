//! Failure diagnostics: screenshots and finalized recordings

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::{debug, info, warn};
use webcheck_common::Settings;

use crate::driver::RecordingHandle;
use crate::error::{ArtifactKind, E2eError, E2eResult};
use crate::outcome::TestId;
use crate::page::Page;

/// What happens to a recording once its test has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum VideoRetention {
    /// Keep every recording as `<test>.webm`
    #[default]
    Always,
    /// Keep recordings of failed tests only
    OnFailure,
}

/// Places diagnostics under the reports directory
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    reports_dir: PathBuf,
    videos_dir: PathBuf,
    retention: VideoRetention,
}

impl ArtifactManager {
    pub fn new(reports_dir: impl Into<PathBuf>, retention: VideoRetention) -> Self {
        let reports_dir = reports_dir.into();
        Self {
            videos_dir: reports_dir.join("videos"),
            reports_dir,
            retention,
        }
    }

    pub fn from_settings(settings: &Settings, retention: VideoRetention) -> Self {
        Self {
            reports_dir: settings.reports_dir.clone(),
            videos_dir: settings.videos_dir(),
            retention,
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Where contexts write in-progress recordings
    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    pub fn retention(&self) -> VideoRetention {
        self.retention
    }

    /// Create the reports directory tree
    pub fn prepare(&self) -> E2eResult<()> {
        std::fs::create_dir_all(&self.reports_dir)?;
        std::fs::create_dir_all(&self.videos_dir)?;
        Ok(())
    }

    pub fn screenshot_path(&self, test: &TestId) -> PathBuf {
        self.reports_dir.join(format!("{}.png", test.file_stem()))
    }

    pub fn video_path(&self, test: &TestId) -> PathBuf {
        self.reports_dir.join(format!("{}.webm", test.file_stem()))
    }

    /// Save a full-page screenshot for a failed test
    ///
    /// Returns the file written, or `None` if capture failed. Failures are
    /// logged and never returned.
    pub async fn capture_failure_screenshot(&self, page: &Page, test: &TestId) -> Option<PathBuf> {
        let path = self.screenshot_path(test);

        let captured = async {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            page.screenshot(&path, true).await
        }
        .await;

        match captured {
            Ok(()) => {
                info!("Failure screenshot saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("{}", capture_error(ArtifactKind::Screenshot, &path, e));
                None
            }
        }
    }

    /// Move a finalized recording into the reports directory
    ///
    /// Must be called after the owning context is closed. Without a
    /// recording, or when the browser left no file behind, this does
    /// nothing. With `OnFailure` retention the recording of a passing test
    /// is deleted instead. Failures are logged and never returned.
    pub fn finalize_recording(
        &self,
        recording: Option<&RecordingHandle>,
        test: &TestId,
        passed: bool,
    ) -> Option<PathBuf> {
        let recording = recording?;
        if !recording.is_finalized() {
            debug!("No recording file for {} at {}", test, recording.path().display());
            return None;
        }

        if passed && self.retention == VideoRetention::OnFailure {
            if let Err(e) = std::fs::remove_file(recording.path()) {
                warn!("{}", capture_error(ArtifactKind::Video, recording.path(), e));
            }
            return None;
        }

        let target = self.video_path(test);
        match move_file(recording.path(), &target) {
            Ok(()) => {
                info!("Video saved to {}", target.display());
                Some(target)
            }
            Err(e) => {
                warn!("{}", capture_error(ArtifactKind::Video, &target, e));
                None
            }
        }
    }
}

/// Rename, falling back to copy and remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

fn capture_error(artifact: ArtifactKind, path: &Path, reason: impl std::fmt::Display) -> E2eError {
    E2eError::ArtifactCapture {
        artifact,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_in(dir: &Path, name: &str) -> RecordingHandle {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"\x1a\x45\xdf\xa3").unwrap();
        RecordingHandle::new(path)
    }

    #[test]
    fn test_paths_use_stable_name() {
        let artifacts = ArtifactManager::new("/tmp/reports", VideoRetention::Always);
        let test = TestId::new("test upload");
        assert_eq!(artifacts.screenshot_path(&test), PathBuf::from("/tmp/reports/test_upload.png"));
        assert_eq!(artifacts.video_path(&test), PathBuf::from("/tmp/reports/test_upload.webm"));
        assert_eq!(artifacts.videos_dir(), Path::new("/tmp/reports/videos"));
    }

    #[test]
    fn test_finalize_without_recording_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path(), VideoRetention::Always);
        let test = TestId::new("t");

        assert_eq!(artifacts.finalize_recording(None, &test, true), None);

        // Configured but never written.
        let missing = RecordingHandle::new(dir.path().join("videos/none.webm"));
        assert_eq!(artifacts.finalize_recording(Some(&missing), &test, false), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finalize_moves_recording() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path(), VideoRetention::Always);
        let recording = recording_in(artifacts.videos_dir(), "abc.webm");

        let saved = artifacts
            .finalize_recording(Some(&recording), &TestId::new("t"), true)
            .unwrap();
        assert_eq!(saved, dir.path().join("t.webm"));
        assert!(saved.is_file());
        assert!(!recording.path().exists());
    }

    #[test]
    fn test_on_failure_retention_discards_passing() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path(), VideoRetention::OnFailure);

        let passing = recording_in(artifacts.videos_dir(), "a.webm");
        assert_eq!(artifacts.finalize_recording(Some(&passing), &TestId::new("ok"), true), None);
        assert!(!passing.path().exists());
        assert!(!dir.path().join("ok.webm").exists());

        let failing = recording_in(artifacts.videos_dir(), "b.webm");
        let saved = artifacts.finalize_recording(Some(&failing), &TestId::new("bad"), false);
        assert_eq!(saved, Some(dir.path().join("bad.webm")));
    }
}
