//! Synthetic camera that emits a drifting gradient with a little sensor noise.
//!
//! Used when no physical capture backend is wired in, and by tests that need real
//! pixel buffers.

use anyhow::{bail, Result};
use chrono::Utc;
use rand::Rng;

use super::{CaptureFormat, DeviceHandle, DeviceProvider, Frame};

const ENABLE_LOGS: bool = true;

use crate::log_info;

pub const VIRTUAL_DEVICE_ID: &str = "virtual:0";

const NOISE_AMPLITUDE: u8 = 6;

#[derive(Debug, Clone)]
pub struct VirtualCamera {
    device_id: String,
}

impl Default for VirtualCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualCamera {
    pub fn new() -> Self {
        Self {
            device_id: VIRTUAL_DEVICE_ID.to_string(),
        }
    }
}

impl DeviceProvider for VirtualCamera {
    fn scan(&self) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn open(&self, device_id: &str, format: CaptureFormat) -> Result<Box<dyn DeviceHandle>> {
        if device_id != self.device_id {
            bail!("no virtual device named {device_id}");
        }
        if format.width == 0 || format.height == 0 {
            bail!("invalid capture format {}x{}", format.width, format.height);
        }

        log_info!(
            "Opened {} at {}x{}@{}fps",
            device_id,
            format.width,
            format.height,
            format.fps
        );
        Ok(Box::new(VirtualHandle {
            format,
            frame_index: 0,
        }))
    }
}

struct VirtualHandle {
    format: CaptureFormat,
    frame_index: u64,
}

impl DeviceHandle for VirtualHandle {
    fn read(&mut self) -> Result<Frame> {
        let CaptureFormat { width, height, .. } = self.format;
        let shift = (self.frame_index % 256) as u32;
        let mut rng = rand::thread_rng();

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let noise = rng.gen_range(0..=NOISE_AMPLITUDE);
                let r = ((x * 255 / width.max(1) + shift) % 256) as u8;
                let g = ((y * 255 / height.max(1)) % 256) as u8;
                let b = (shift as u8).wrapping_add(noise);
                pixels.extend_from_slice(&[r.saturating_add(noise), g, b]);
            }
        }

        self.frame_index += 1;
        Ok(Frame {
            width,
            height,
            pixels,
            captured_at: Utc::now(),
        })
    }

    fn close(self: Box<Self>) {
        log_info!(
            "Closed virtual camera after {} frames",
            self.frame_index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_format() -> CaptureFormat {
        CaptureFormat {
            width: 8,
            height: 4,
            fps: 30,
        }
    }

    #[test]
    fn frames_match_requested_format() {
        let camera = VirtualCamera::new();
        let id = camera.scan().unwrap();
        let mut handle = camera.open(&id, small_format()).unwrap();

        let frame = handle.read().unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.pixels.len(), 8 * 4 * 3);
        assert!(frame.to_rgb_image().is_ok());
        handle.close();
    }

    #[test]
    fn unknown_device_is_rejected() {
        let camera = VirtualCamera::new();
        assert!(camera.open("/dev/video7", small_format()).is_err());
    }
}
