use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::device::{CameraBackend, CaptureFormat};

/// Longest session the config may allow.
pub const MAX_SESSION_SECS: u64 = 24 * 60 * 60;

/// On-disk configuration, read once at startup.
///
/// Every field has a default so a partial (or missing) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub frames_dir: PathBuf,
    /// `v4l2` for a real webcam, `virtual` for synthetic frames.
    pub camera: CameraBackend,
    /// Skips the device scan when set.
    pub device_id: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    /// Used by the control endpoint when a request carries no `time`.
    pub default_duration_secs: u64,
    pub capture_interval_ms: u64,
    pub poll_resolution_ms: u64,
    pub stop_timeout_ms: u64,
    pub detector_url: Option<String>,
    pub detector_timeout_ms: u64,
    /// Empty means every label the detector reports.
    pub tracked_labels: Vec<String>,
    pub min_confidence: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8898".into(),
            database_path: PathBuf::from("camwatch.sqlite3"),
            frames_dir: PathBuf::from("images"),
            camera: CameraBackend::V4l2,
            device_id: None,
            frame_width: 640,
            frame_height: 480,
            fps: 30,
            min_duration_secs: 60,
            max_duration_secs: 300,
            default_duration_secs: 300,
            capture_interval_ms: 3_000,
            poll_resolution_ms: 100,
            stop_timeout_ms: 2_000,
            detector_url: None,
            detector_timeout_ms: 5_000,
            tracked_labels: Vec::new(),
            min_confidence: 0.0,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found; using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_duration_secs == 0 {
            bail!("min_duration_secs must be greater than zero");
        }
        if self.min_duration_secs > self.max_duration_secs {
            bail!(
                "min_duration_secs ({}) exceeds max_duration_secs ({})",
                self.min_duration_secs,
                self.max_duration_secs
            );
        }
        if self.max_duration_secs > MAX_SESSION_SECS {
            bail!(
                "max_duration_secs ({}) exceeds the {}s ceiling",
                self.max_duration_secs,
                MAX_SESSION_SECS
            );
        }
        if !(self.min_duration_secs..=self.max_duration_secs).contains(&self.default_duration_secs)
        {
            bail!(
                "default_duration_secs ({}) must lie within {}..={}",
                self.default_duration_secs,
                self.min_duration_secs,
                self.max_duration_secs
            );
        }
        if self.capture_interval_ms == 0 || self.poll_resolution_ms == 0 {
            bail!("capture_interval_ms and poll_resolution_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must lie within 0.0..=1.0");
        }
        Ok(())
    }

    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_duration_secs)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            min_duration: Duration::from_secs(self.min_duration_secs),
            max_duration: Duration::from_secs(self.max_duration_secs),
            capture_interval: Duration::from_millis(self.capture_interval_ms),
            poll_resolution: Duration::from_millis(self.poll_resolution_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            format: CaptureFormat {
                width: self.frame_width,
                height: self.frame_height,
                fps: self.fps,
            },
            device_id: self.device_id.clone(),
            tracked_labels: self.tracked_labels.clone(),
            min_confidence: self.min_confidence,
        }
    }
}

/// Runtime knobs of the session controller and its capture loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub capture_interval: Duration,
    /// Upper bound on how long the loop sleeps before re-checking cancellation and
    /// the deadline.
    pub poll_resolution: Duration,
    /// How long `turn_off` waits for the loop before tearing down anyway.
    pub stop_timeout: Duration,
    pub format: CaptureFormat,
    pub device_id: Option<String>,
    pub tracked_labels: Vec<String>,
    pub min_confidence: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        AppConfig::default().session_config()
    }
}

impl SessionConfig {
    /// Whether a detection should be folded into the session aggregate.
    pub fn accepts(&self, label: &str, confidence: f32) -> bool {
        if confidence < self.min_confidence {
            return false;
        }
        self.tracked_labels.is_empty() || self.tracked_labels.iter().any(|tracked| tracked == label)
    }
}
