use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::playlist::{DEFAULT_INTERVAL_SECONDS, Ordering};
use crate::tasks::engine::EngineOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Root directory scanned recursively for images and videos.
    pub media_library_path: PathBuf,
    /// Seconds an image stays on screen before the next one is due.
    pub interval_seconds: u32,
    pub ordering: Ordering,
    /// Seed for the random ordering; drawn at startup when absent.
    pub shuffle_seed: Option<u64>,
    /// Where the current index and last advance survive restarts.
    pub state_file: Option<PathBuf>,
    /// Decoded images are downscaled to fit this box.
    pub target_width: u32,
    pub target_height: u32,
    pub mute_videos: bool,
    pub swipe_to_change: bool,
    /// Keep watching the library for added and removed files.
    pub watch_library: bool,
    pub command_queue_capacity: usize,
    /// How long the headless sink pretends each video plays.
    #[serde(with = "humantime_serde")]
    pub headless_video_duration: Duration,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.interval_seconds > 0,
            "interval-seconds must be greater than zero"
        );
        ensure!(
            self.command_queue_capacity > 0,
            "command-queue-capacity must be greater than zero"
        );
        ensure!(
            self.target_width > 0 && self.target_height > 0,
            "target-width and target-height must be greater than zero"
        );
        ensure!(
            !self.media_library_path.as_os_str().is_empty(),
            "media-library-path is required"
        );
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            media_library_path: PathBuf::new(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            ordering: Ordering::Selection,
            shuffle_seed: None,
            state_file: None,
            target_width: 1920,
            target_height: 1080,
            mute_videos: false,
            swipe_to_change: true,
            watch_library: true,
            command_queue_capacity: 32,
            headless_video_duration: Duration::from_secs(10),
        }
    }
}

impl From<&Configuration> for EngineOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            target_width: cfg.target_width,
            target_height: cfg.target_height,
            swipe_to_change: cfg.swipe_to_change,
            command_queue_capacity: cfg.command_queue_capacity,
        }
    }
}
