//! Conversions from the pixel formats webcams hand out to packed RGB8.

use anyhow::{bail, Context, Result};
use image::ImageFormat;

/// YUYV 4:2:2 (two pixels per `Y0 U Y1 V` quad) to RGB8, BT.601 full range.
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = (width as usize) * (height as usize);
    if width % 2 != 0 {
        bail!("YUYV frame width {width} is not even");
    }
    if data.len() < pixels * 2 {
        bail!(
            "YUYV buffer of {} bytes is short for {}x{}",
            data.len(),
            width,
            height
        );
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;

    // Coefficients scaled by 1000.
    let r = y + (1402 * v) / 1000;
    let g = y - (344 * u + 714 * v) / 1000;
    let b = y + (1772 * u) / 1000;
    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Decodes an MJPEG frame. Returns `(width, height, rgb)`.
pub fn decode_jpeg(data: &[u8]) -> Result<(u32, u32, Vec<u8>)> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .context("failed to decode MJPEG frame")?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok((width, height, image.into_raw()))
}
