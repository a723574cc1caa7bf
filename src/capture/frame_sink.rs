use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use chrono::Utc;
use image::ImageFormat;

use crate::device::Frame;

/// Where raw frames go. Saving is best effort from the loop's point of view.
pub trait FrameSink: Send + Sync {
    fn next_name(&self) -> PathBuf;

    fn save(&self, frame: &Frame, path: &Path) -> Result<()>;
}

/// Writes frames as `frame_<yyyymmdd_HHMMSS>_<seq>.jpg` into one directory.
pub struct JpegFrameSink {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl JpegFrameSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create frames directory {}", dir.display()))?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for JpegFrameSink {
    fn next_name(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.dir.join(format!("frame_{stamp}_{seq:06}.jpg"))
    }

    fn save(&self, frame: &Frame, path: &Path) -> Result<()> {
        let image = frame.to_rgb_image()?;
        image
            .save_with_format(path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write frame to {}", path.display()))
    }
}
