use image::imageops::{self, FilterType};
use scanfield_core::Rect;

use super::{invalid, EnhanceError};
use crate::buffer::{ImageBuffer, CHANNELS};

/// Scale both axes by `factor`. New dimensions are `round(old * factor)`.
///
/// Shrinking averages the covered source area per output pixel; enlarging
/// interpolates linearly.
pub fn resize(buf: ImageBuffer, factor: f64) -> Result<ImageBuffer, EnhanceError> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(invalid("resize", &buf, format!("scale factor must be positive, got {factor}")));
    }
    let w = (buf.width() as f64 * factor).round();
    let h = (buf.height() as f64 * factor).round();
    if w < 1.0 || h < 1.0 {
        return Err(invalid("resize", &buf, format!("scale factor {factor} collapses the image")));
    }
    if w > u32::MAX as f64 || h > u32::MAX as f64 {
        let detail = format!("scale factor {factor} overflows the image size");
        return Err(invalid("resize", &buf, detail));
    }
    let (w, h) = (w as u32, h as u32);
    if (w, h) == buf.dimensions() {
        return Ok(buf);
    }

    if factor < 1.0 {
        Ok(area_resize(&buf, w, h))
    } else {
        let out = imageops::resize(&buf.as_channel_image(), w, h, FilterType::Triangle);
        Ok(ImageBuffer::from_parts(w, h, buf.format(), out.into_raw()))
    }
}

/// Per output index, the contributing source indices and their coverage.
fn area_taps(src: u32, dst: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let mut taps = Vec::new();
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src as usize {
                let lo = start.max(s as f64);
                let hi = end.min(s as f64 + 1.0);
                if hi > lo {
                    taps.push((s, ((hi - lo) / scale) as f32));
                }
                s += 1;
            }
            taps
        })
        .collect()
}

fn area_resize(buf: &ImageBuffer, w: u32, h: u32) -> ImageBuffer {
    let (sw, sh) = (buf.width() as usize, buf.height() as usize);
    let (dw, dh) = (w as usize, h as usize);
    let src = buf.as_bytes();
    let x_taps = area_taps(sw as u32, w);
    let y_taps = area_taps(sh as u32, h);

    // Horizontal pass into floats, then vertical pass into bytes.
    let mut mid = vec![0f32; dw * sh * CHANNELS];
    for y in 0..sh {
        let row = &src[y * sw * CHANNELS..(y + 1) * sw * CHANNELS];
        for (x, taps) in x_taps.iter().enumerate() {
            let out = &mut mid[(y * dw + x) * CHANNELS..(y * dw + x + 1) * CHANNELS];
            for &(s, wgt) in taps {
                for c in 0..CHANNELS {
                    out[c] += row[s * CHANNELS + c] as f32 * wgt;
                }
            }
        }
    }

    let mut data = vec![0u8; dw * dh * CHANNELS];
    for (y, taps) in y_taps.iter().enumerate() {
        for x in 0..dw {
            let mut acc = [0f32; CHANNELS];
            for &(s, wgt) in taps {
                let i = (s * dw + x) * CHANNELS;
                for c in 0..CHANNELS {
                    acc[c] += mid[i + c] * wgt;
                }
            }
            let o = (y * dw + x) * CHANNELS;
            for c in 0..CHANNELS {
                data[o + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    ImageBuffer::from_parts(w, h, buf.format(), data)
}

/// Copy out `rect`, which must have positive size and lie inside the image.
pub fn crop(buf: &ImageBuffer, rect: Rect) -> Result<ImageBuffer, EnhanceError> {
    if !rect.fits_within(buf.width(), buf.height()) {
        return Err(EnhanceError::InvalidRegion {
            op: "crop",
            rect,
            width: buf.width(),
            height: buf.height(),
        });
    }
    let stride = buf.stride();
    let row_len = rect.width as usize * CHANNELS;
    let mut data = Vec::with_capacity(row_len * rect.height as usize);
    for y in rect.y..rect.y + rect.height {
        let start = y as usize * stride + rect.x as usize * CHANNELS;
        data.extend_from_slice(&buf.as_bytes()[start..start + row_len]);
    }
    Ok(ImageBuffer::from_parts(rect.width, rect.height, buf.format(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::ops::testutil::{gray_at, gray_from_fn};

    #[test]
    fn crop_yields_requested_dimensions() {
        let buf = gray_from_fn(40, 30, |x, y| (x + y) as u8);
        for rect in [
            Rect::new(0, 0, 40, 30),
            Rect::new(5, 7, 1, 1),
            Rect::new(10, 3, 30, 27),
            Rect::new(39, 29, 1, 1),
        ] {
            let out = crop(&buf, rect).unwrap();
            assert_eq!(out.dimensions(), (rect.width, rect.height));
            assert_eq!(gray_at(&out, 0, 0), (rect.x + rect.y) as u8);
        }
    }

    #[test]
    fn crop_rejects_out_of_bounds_and_empty() {
        let buf = gray_from_fn(10, 10, |_, _| 0);
        for rect in [
            Rect::new(5, 5, 6, 1),
            Rect::new(0, 9, 1, 2),
            Rect::new(0, 0, 0, 5),
            Rect::new(0, 0, 5, 0),
            Rect::new(u32::MAX, 0, 2, 2),
        ] {
            let err = crop(&buf, rect).unwrap_err();
            assert!(
                matches!(err, EnhanceError::InvalidRegion { width: 10, height: 10, .. }),
                "{rect} should be rejected"
            );
        }
    }

    #[test]
    fn resize_identity_is_noop() {
        let buf = gray_from_fn(13, 7, |x, y| (x * 19 + y * 7) as u8);
        let out = resize(buf.clone(), 1.0).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn resize_rounds_dimensions() {
        let buf = gray_from_fn(15, 9, |_, _| 100);
        assert_eq!(resize(buf.clone(), 2.0).unwrap().dimensions(), (30, 18));
        assert_eq!(resize(buf.clone(), 0.5).unwrap().dimensions(), (8, 5));
        assert_eq!(resize(buf, 0.8).unwrap().dimensions(), (12, 7));
    }

    #[test]
    fn area_downsample_averages_blocks() {
        let buf = gray_from_fn(4, 2, |x, _| if x % 2 == 0 { 0 } else { 200 });
        let out = resize(buf, 0.5).unwrap();
        assert_eq!(out.dimensions(), (2, 1));
        assert_eq!(gray_at(&out, 0, 0), 100);
        assert_eq!(gray_at(&out, 1, 0), 100);
    }

    #[test]
    fn upsample_keeps_flat_regions_flat() {
        let buf = ImageBuffer::filled(5, 5, PixelFormat::Bgra8, [10, 20, 30, 255]);
        let out = resize(buf, 4.0).unwrap();
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.rgba(11, 17), Some([10, 20, 30, 255]));
        assert_eq!(out.format(), PixelFormat::Bgra8);
    }

    #[test]
    fn resize_rejects_bad_factors() {
        let buf = gray_from_fn(4, 4, |_, _| 0);
        for f in [0.0, -1.0, f64::NAN, f64::INFINITY, 0.01] {
            assert!(matches!(
                resize(buf.clone(), f),
                Err(EnhanceError::InvalidParameter { op: "resize", .. })
            ));
        }
    }
}
