use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::frame::{chroma_dims, ChromaLayout, Rotation, YuvFrame};
use crate::geometry::InferenceGeometry;

/// Convert a YUV 4:2:0 frame to interleaved RGBA of the same size.
///
/// Uses BT.601 limited-range coefficients, the same transform the platform
/// YUV intrinsic applies. Alpha is always opaque.
pub fn yuv_to_rgba(frame: &YuvFrame, layout: ChromaLayout) -> Result<RgbaImage> {
    let layout = frame.resolve_layout(layout)?;
    let w = frame.width as usize;
    let h = frame.height as usize;
    let (cw, _) = chroma_dims(frame.width, frame.height);
    let len = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| anyhow!("RGBA frame dimensions overflow"))?;

    let luma = frame.y_plane();
    let mut rgba = vec![0u8; len];
    for j in 0..h {
        for i in 0..w {
            let (u, v) = frame.chroma_at(layout, (j / 2) * cw + i / 2);
            let offset = (j * w + i) * 4;
            rgba[offset..offset + 4].copy_from_slice(&bt601_to_rgba(luma[j * w + i], u, v));
        }
    }

    RgbaImage::from_raw(frame.width, frame.height, rgba)
        .ok_or_else(|| anyhow!("RGBA buffer does not match {}x{}", frame.width, frame.height))
}

/// Rotate clockwise by whole quarter turns.
pub fn rotate(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation.quarter_turns() {
        0 => image,
        1 => imageops::rotate90(&image),
        2 => imageops::rotate180(&image),
        _ => imageops::rotate270(&image),
    }
}

/// Resize to the inference geometry, then rotate.
pub fn prepare_input(
    image: &RgbaImage,
    geometry: InferenceGeometry,
    rotation: Rotation,
) -> RgbaImage {
    let resized = if image.dimensions() == (geometry.width, geometry.height) {
        image.clone()
    } else {
        imageops::resize(image, geometry.width, geometry.height, FilterType::Triangle)
    };
    rotate(resized, rotation)
}

fn bt601_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = 1.164_f32 * (f32::from(y) - 16.0);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    let r = y + 1.596_f32 * v;
    let g = y - 0.813_f32 * v - 0.391_f32 * u;
    let b = y + 2.018_f32 * u;

    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b), 0xFF]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
