//! Command-line options that configure the harness

use clap::Args;
use webcheck_common::{BrowserKind, Settings, Viewport};

use crate::artifacts::{ArtifactManager, VideoRetention};
use crate::driver::{ContextConfig, LaunchConfig};

/// Harness flags, flattened into a runner's own `clap::Parser`
#[derive(Args, Debug, Clone, PartialEq)]
pub struct HarnessOptions {
    /// Run the browser without a window (also enabled by HEADLESS)
    #[arg(long)]
    pub headless: bool,

    /// Viewport size as WxH
    #[arg(long, default_value = "1280x720")]
    pub resolution: Viewport,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    pub browser: BrowserKind,

    /// Disable per-test video recording
    #[arg(long = "no-record-video", action = clap::ArgAction::SetFalse)]
    pub record_video: bool,

    /// Which recordings to keep
    #[arg(long, value_enum, default_value_t = VideoRetention::Always)]
    pub video_retention: VideoRetention,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            headless: false,
            resolution: Viewport::default(),
            browser: BrowserKind::default(),
            record_video: true,
            video_retention: VideoRetention::Always,
        }
    }
}

impl HarnessOptions {
    pub fn launch_config(&self, settings: &Settings) -> LaunchConfig {
        LaunchConfig {
            headless: self.headless || settings.headless,
            timeout: settings.launch_timeout,
            slow_mo: (!settings.slow_mo.is_zero()).then_some(settings.slow_mo),
        }
    }

    pub fn artifact_manager(&self, settings: &Settings) -> ArtifactManager {
        ArtifactManager::from_settings(settings, self.video_retention)
    }

    pub fn context_config(&self, artifacts: &ArtifactManager) -> ContextConfig {
        ContextConfig {
            viewport: self.resolution,
            record_video_dir: self.record_video.then(|| artifacts.videos_dir().to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use webcheck_common::MapEnv;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        harness: HarnessOptions,
    }

    fn settings(headless: &str) -> Settings {
        let env = MapEnv::new()
            .with("API_BASE", "http://api.test")
            .with("UI_BASE", "http://ui.test")
            .with("HEADLESS", headless)
            .with("PLAYWRIGHT_TIMEOUT", "5000")
            .with("PLAYWRIGHT_SLOWMO", "0")
            .with("LOG_LEVEL", "info");
        Settings::from_source(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["suite"]);
        assert_eq!(cli.harness, HarnessOptions::default());
        assert_eq!(cli.harness.resolution, Viewport { width: 1280, height: 720 });
        assert!(cli.harness.record_video);
    }

    #[test]
    fn test_resolution_reaches_context_config() {
        let cli = Cli::parse_from(["suite", "--resolution", "1024x768", "--browser", "firefox"]);
        let artifacts = ArtifactManager::new("reports", VideoRetention::Always);
        let config = cli.harness.context_config(&artifacts);

        assert_eq!(config.viewport.width, 1024);
        assert_eq!(config.viewport.height, 768);
        assert_eq!(cli.harness.browser, BrowserKind::Firefox);
        assert_eq!(config.record_video_dir, Some(std::path::PathBuf::from("reports/videos")));
    }

    #[test]
    fn test_rejects_bad_resolution() {
        assert!(Cli::try_parse_from(["suite", "--resolution", "0x768"]).is_err());
        assert!(Cli::try_parse_from(["suite", "--resolution", "wide"]).is_err());
    }

    #[test]
    fn test_no_record_video() {
        let cli = Cli::parse_from(["suite", "--no-record-video", "--video-retention", "on-failure"]);
        let artifacts = cli.harness.artifact_manager(&settings("false"));
        assert_eq!(cli.harness.context_config(&artifacts).record_video_dir, None);
        assert_eq!(artifacts.retention(), VideoRetention::OnFailure);
    }

    #[test]
    fn test_headless_merges_flag_and_env() {
        let opts = HarnessOptions::default();
        assert!(!opts.launch_config(&settings("false")).headless);
        assert!(opts.launch_config(&settings("true")).headless);

        let opts = HarnessOptions {
            headless: true,
            ..Default::default()
        };
        let launch = opts.launch_config(&settings("false"));
        assert!(launch.headless);
        assert_eq!(launch.timeout, Duration::from_millis(5000));
        assert_eq!(launch.slow_mo, None);
    }
}
