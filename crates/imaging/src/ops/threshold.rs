use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::edges;
use imageproc::filter::gaussian_blur_f32;

use super::filter::sigma_for_kernel;
use super::{invalid, EnhanceError};
use crate::buffer::ImageBuffer;

/// Constant subtracted from the local mean in [`adaptive_threshold`].
pub const ADAPTIVE_OFFSET: i32 = -2;

fn map_luma(buf: &ImageBuffer, f: impl Fn(u8) -> u8) -> ImageBuffer {
    let mut gray = buf.to_luma();
    for p in gray.pixels_mut() {
        p[0] = f(p[0]);
    }
    ImageBuffer::from_luma(&gray, buf.format())
}

/// Binarized negative: luma above `threshold` becomes black, everything else
/// white.
///
/// This is not a photometric negative. Each call re-binarizes, so applying
/// it twice to a non-binary image does not give the original back.
pub fn invert(buf: ImageBuffer, threshold: u8) -> ImageBuffer {
    map_luma(&buf, |v| if v > threshold { 0 } else { 255 })
}

/// Photometric negative of the colour channels. Applying it twice is the
/// identity.
pub fn bitwise_not(mut buf: ImageBuffer) -> ImageBuffer {
    buf.map_color(|c| !c);
    buf
}

/// Gaussian-weighted local threshold over a `block × block` neighbourhood.
pub fn adaptive_threshold(buf: ImageBuffer, block: u32) -> Result<ImageBuffer, EnhanceError> {
    if block < 3 || block % 2 == 0 {
        return Err(invalid(
            "adaptive_threshold",
            &buf,
            format!("block size must be odd and at least 3, got {block}"),
        ));
    }
    let gray = buf.to_luma();
    let mean = gaussian_blur_f32(&gray, sigma_for_kernel(block));
    let out = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0] as i32;
        let t = mean.get_pixel(x, y)[0] as i32 - ADAPTIVE_OFFSET;
        Luma([if v > t { 255 } else { 0 }])
    });
    Ok(ImageBuffer::from_luma(&out, buf.format()))
}

/// Global binarization at the Otsu-optimal level.
pub fn otsu(buf: ImageBuffer) -> ImageBuffer {
    let level = otsu_level(&buf.to_luma());
    map_luma(&buf, |v| if v > level { 255 } else { 0 })
}

/// Luma at or below `threshold` drops to zero; brighter values are kept.
pub fn to_zero(buf: ImageBuffer, threshold: u8) -> ImageBuffer {
    map_luma(&buf, |v| if v > threshold { v } else { 0 })
}

/// Luma above `threshold` is capped at `threshold`.
pub fn trunc(buf: ImageBuffer, threshold: u8) -> ImageBuffer {
    map_luma(&buf, |v| v.min(threshold))
}

/// Canny edge map rendered as opaque gray.
pub fn canny(buf: ImageBuffer, low: f32, high: f32) -> Result<ImageBuffer, EnhanceError> {
    if !(low >= 0.0 && high >= low) {
        return Err(invalid(
            "canny",
            &buf,
            format!("thresholds must satisfy 0 <= low <= high, got ({low}, {high})"),
        ));
    }
    if buf.width() == 0 || buf.height() == 0 {
        return Ok(buf);
    }
    let edges = edges::canny(&buf.to_luma(), low, high);
    Ok(ImageBuffer::from_luma(&edges, buf.format()))
}
