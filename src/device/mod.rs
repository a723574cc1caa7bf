//! Capture device collaborators.
//!
//! A [`DeviceProvider`] finds and opens a camera; the resulting [`DeviceHandle`] is
//! moved into a [`DeviceSlot`], which is the only place the session controller and
//! the capture loop touch it from.

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod pixels;
mod slot;
#[cfg(target_os = "linux")]
pub mod v4l2_camera;
pub mod virtual_camera;

pub use slot::DeviceSlot;
#[cfg(target_os = "linux")]
pub use v4l2_camera::V4l2Camera;
pub use virtual_camera::VirtualCamera;

use std::{fmt, io::Cursor, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// A single packed RGB8 frame.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

impl Frame {
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            anyhow!(
                "frame buffer of {} bytes does not match {}x{} RGB",
                self.pixels.len(),
                self.width,
                self.height
            )
        })
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let image = self.to_rgb_image()?;
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .context("failed to encode frame as JPEG")?;
        Ok(buffer.into_inner())
    }
}

/// Locates and opens capture devices.
pub trait DeviceProvider: Send + Sync {
    /// Picks a device identifier, if any device is present.
    fn scan(&self) -> Option<String>;

    fn open(&self, device_id: &str, format: CaptureFormat) -> Result<Box<dyn DeviceHandle>>;
}

/// An open camera. Reads block until a frame is available.
pub trait DeviceHandle: Send {
    fn read(&mut self) -> Result<Frame>;

    fn close(self: Box<Self>);
}

/// Which camera implementation the binary captures from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Real webcam via Video4Linux2.
    #[default]
    V4l2,
    /// Synthetic frames, for machines without a camera.
    Virtual,
}

pub fn provider_for(backend: CameraBackend) -> Result<Arc<dyn DeviceProvider>> {
    match backend {
        CameraBackend::Virtual => Ok(Arc::new(VirtualCamera::new())),
        #[cfg(target_os = "linux")]
        CameraBackend::V4l2 => Ok(Arc::new(V4l2Camera::new())),
        #[cfg(not(target_os = "linux"))]
        CameraBackend::V4l2 => Err(anyhow!(
            "v4l2 capture is only available on Linux; set \"camera\": \"virtual\""
        )),
    }
}
