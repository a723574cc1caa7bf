//! USB/CSI webcams through Video4Linux2.
//!
//! Frames are requested as YUYV at the configured size and frame rate; drivers that
//! only offer MJPEG are decoded instead. Device ids are `/dev/videoN` paths (a bare
//! index such as `0` also works).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use v4l::{
    buffer::Type,
    capability::Flags,
    format::FourCC,
    fraction::Fraction,
    io::{mmap::Stream, traits::CaptureStream},
    prelude::*,
    video::Capture as _,
};

use super::{
    pixels::{decode_jpeg, yuyv_to_rgb},
    CaptureFormat, DeviceHandle, DeviceProvider, Frame,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const BUFFER_COUNT: u32 = 4;
/// Upper bound on a single dequeue, so a wedged camera surfaces as a read error.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProvider for V4l2Camera {
    /// First node that advertises video capture.
    fn scan(&self) -> Option<String> {
        for node in v4l::context::enum_devices() {
            let path = node.path().to_path_buf();
            let capable = Device::with_path(&path)
                .and_then(|dev| dev.query_caps())
                .map(|caps| caps.capabilities.contains(Flags::VIDEO_CAPTURE))
                .unwrap_or(false);
            if capable {
                log_info!("Found capture device {}", path.display());
                return Some(path.display().to_string());
            }
        }
        log_warn!("No V4L2 capture device found");
        None
    }

    fn open(&self, device_id: &str, format: CaptureFormat) -> Result<Box<dyn DeviceHandle>> {
        let dev = match device_id.parse::<usize>() {
            Ok(index) => Device::new(index),
            Err(_) => Device::with_path(device_id),
        }
        .with_context(|| format!("failed to open {device_id}"))?;

        let mut fmt = dev
            .format()
            .with_context(|| format!("failed to read format of {device_id}"))?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(b"YUYV");
        let fmt = dev
            .set_format(&fmt)
            .with_context(|| format!("failed to set format on {device_id}"))?;

        let fourcc = fmt.fourcc.repr;
        if !matches!(&fourcc, b"YUYV" | b"MJPG" | b"JPEG") {
            bail!(
                "{device_id} offers unsupported pixel format {}",
                String::from_utf8_lossy(&fourcc)
            );
        }

        if format.fps > 0 {
            match dev.params() {
                Ok(mut params) => {
                    params.interval = Fraction::new(1, format.fps);
                    if let Err(err) = dev.set_params(&params) {
                        log_warn!("{device_id} rejected {} fps: {err}", format.fps);
                    }
                }
                Err(err) => log_warn!("Failed to read stream parameters of {device_id}: {err}"),
            }
        }

        let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
            .with_context(|| format!("failed to map capture buffers of {device_id}"))?;
        stream.set_timeout(READ_TIMEOUT);

        log_info!(
            "Opened {} at {}x{} ({})",
            device_id,
            fmt.width,
            fmt.height,
            String::from_utf8_lossy(&fourcc)
        );

        Ok(Box::new(V4l2Handle {
            device_id: device_id.to_string(),
            stream,
            _device: dev,
            width: fmt.width,
            height: fmt.height,
            fourcc,
            frames: 0,
        }))
    }
}

struct V4l2Handle {
    device_id: String,
    // Declared before the device so the buffers are unmapped first.
    stream: Stream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    fourcc: [u8; 4],
    frames: u64,
}

impl DeviceHandle for V4l2Handle {
    fn read(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .with_context(|| format!("failed to dequeue a frame from {}", self.device_id))?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = &buf[..used];

        let (width, height, pixels) = match &self.fourcc {
            b"YUYV" => (self.width, self.height, yuyv_to_rgb(data, self.width, self.height)?),
            _ => decode_jpeg(data)?,
        };

        self.frames += 1;
        Ok(Frame {
            width,
            height,
            pixels,
            captured_at: Utc::now(),
        })
    }

    fn close(self: Box<Self>) {
        log_info!(
            "Closed {} after {} frames",
            self.device_id,
            self.frames
        );
    }
}
