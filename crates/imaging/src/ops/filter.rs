use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;

use super::{invalid, reflect101, replicate, EnhanceError};
use crate::buffer::{ImageBuffer, ALPHA, CHANNELS};

/// Patch radius of the non-local-means comparison window (3×3 patches).
const DENOISE_PATCH_RADIUS: isize = 1;
/// Search radius around each pixel (7×7 candidate patches).
const DENOISE_SEARCH_RADIUS: isize = 3;
/// Filter strength `h`; larger values smooth more.
const DENOISE_STRENGTH: f32 = 3.0;

const BILATERAL_SIGMA_COLOR: f32 = 80.0;
const BILATERAL_SIGMA_SPACE: f32 = 80.0;

/// Number of fixed sharpening kernels accepted by [`sharpen`].
pub const SHARPEN_VARIANTS: u8 = 5;

#[rustfmt::skip]
const SHARPEN_KERNELS: [[f32; 9]; SHARPEN_VARIANTS as usize] = [
    [ 0.0, -1.0,  0.0,
     -1.0,  5.0, -1.0,
      0.0, -1.0,  0.0],
    [ 0.0, -1.5,  0.0,
     -1.5,  7.0, -1.5,
      0.0, -1.5,  0.0],
    [-0.5, -1.0, -0.5,
     -1.0,  7.0, -1.0,
     -0.5, -1.0, -0.5],
    [-0.5, -0.5, -0.5,
     -0.5,  5.0, -0.5,
     -0.5, -0.5, -0.5],
    [-1.0, -1.0, -1.0,
     -1.0,  9.0, -1.0,
     -1.0, -1.0, -1.0],
];

/// Gaussian sigma implied by a kernel size when none is given.
pub(crate) fn sigma_for_kernel(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Non-local-means denoising.
///
/// Patch similarity is measured on luma; the resulting weights average the
/// colour channels of the candidate pixels.
pub fn denoise(mut buf: ImageBuffer) -> ImageBuffer {
    let (w, h) = (buf.width() as usize, buf.height() as usize);
    if w == 0 || h == 0 {
        return buf;
    }
    let luma: Vec<f32> = buf.to_luma().into_raw().into_iter().map(f32::from).collect();
    let n = w * h;
    let h2 = DENOISE_STRENGTH * DENOISE_STRENGTH;

    let mut weight_sum = vec![0f32; n];
    let mut acc = vec![0f32; n * 3];
    let mut diff = vec![0f32; n];
    {
        let src = buf.as_bytes();
        for oy in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
            for ox in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                for y in 0..h {
                    let sy = replicate(y as isize + oy, h);
                    for x in 0..w {
                        let sx = replicate(x as isize + ox, w);
                        let d = luma[y * w + x] - luma[sy * w + sx];
                        diff[y * w + x] = d * d;
                    }
                }
                let dist = box_mean(&diff, w, h, DENOISE_PATCH_RADIUS);
                for y in 0..h {
                    let sy = replicate(y as isize + oy, h);
                    for x in 0..w {
                        let sx = replicate(x as isize + ox, w);
                        let i = y * w + x;
                        let wgt = (-dist[i] / h2).exp();
                        weight_sum[i] += wgt;
                        let j = (sy * w + sx) * CHANNELS;
                        for c in 0..3 {
                            acc[i * 3 + c] += wgt * src[j + c] as f32;
                        }
                    }
                }
            }
        }
    }

    let data = buf.as_bytes_mut();
    for i in 0..n {
        for c in 0..3 {
            let v = acc[i * 3 + c] / weight_sum[i];
            data[i * CHANNELS + c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    buf
}

/// Mean over a `(2r+1)²` window with replicated borders.
fn box_mean(src: &[f32], w: usize, h: usize, r: isize) -> Vec<f32> {
    let mut tmp = vec![0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            tmp[y * w + x] = (-r..=r).map(|k| row[replicate(x as isize + k, w)]).sum();
        }
    }
    let norm = ((2 * r + 1) * (2 * r + 1)) as f32;
    let mut out = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let s: f32 = (-r..=r).map(|k| tmp[replicate(y as isize + k, h) * w + x]).sum();
            out[y * w + x] = s / norm;
        }
    }
    out
}

/// Symmetric `kernel × kernel` Gaussian blur; sigma follows from the size.
pub fn gaussian_blur(mut buf: ImageBuffer, kernel: u32) -> Result<ImageBuffer, EnhanceError> {
    if kernel == 0 || kernel % 2 == 0 {
        return Err(invalid(
            "gaussian_blur",
            &buf,
            format!("kernel size must be odd and positive, got {kernel}"),
        ));
    }
    let blurred = gaussian_blur_f32(&buf.as_channel_image(), sigma_for_kernel(kernel));
    for (dst, src) in buf
        .as_bytes_mut()
        .chunks_exact_mut(CHANNELS)
        .zip(blurred.as_raw().chunks_exact(CHANNELS))
    {
        dst[..ALPHA].copy_from_slice(&src[..ALPHA]);
    }
    Ok(buf)
}

/// Edge-preserving smoothing on the grayscale image over a disc of the given
/// diameter. The output is opaque gray.
pub fn bilateral_filter(buf: ImageBuffer, diameter: u32) -> Result<ImageBuffer, EnhanceError> {
    if diameter == 0 {
        return Err(invalid("bilateral_filter", &buf, "diameter must be positive"));
    }
    let gray = buf.to_luma();
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let radius = (diameter / 2) as isize;

    let space_coeff = -0.5 / (BILATERAL_SIGMA_SPACE * BILATERAL_SIGMA_SPACE);
    let color_coeff = -0.5 / (BILATERAL_SIGMA_COLOR * BILATERAL_SIGMA_COLOR);
    let mut taps = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f32;
            if d2 <= (radius * radius) as f32 {
                taps.push((dx, dy, (d2 * space_coeff).exp()));
            }
        }
    }
    let color_lut: Vec<f32> = (0..256).map(|d| ((d * d) as f32 * color_coeff).exp()).collect();

    let src = gray.as_raw();
    let mut out = GrayImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let center = src[y * w + x];
            let (mut sum, mut norm) = (0f32, 0f32);
            for &(dx, dy, ws) in &taps {
                let sx = reflect101(x as isize + dx, w);
                let sy = reflect101(y as isize + dy, h);
                let v = src[sy * w + sx];
                let wgt = ws * color_lut[v.abs_diff(center) as usize];
                sum += wgt * v as f32;
                norm += wgt;
            }
            out.put_pixel(x as u32, y as u32, Luma([(sum / norm).round().clamp(0.0, 255.0) as u8]));
        }
    }
    Ok(ImageBuffer::from_luma(&out, buf.format()))
}

/// Convolve the colour channels with one of the fixed 3×3 sharpening
/// kernels. Variant 1 is the plain cross; higher variants weigh the centre
/// more and bring in the diagonals.
pub fn sharpen(buf: ImageBuffer, variant: u8) -> Result<ImageBuffer, EnhanceError> {
    if !(1..=SHARPEN_VARIANTS).contains(&variant) {
        return Err(invalid(
            "sharpen",
            &buf,
            format!("variant must be 1..={SHARPEN_VARIANTS}, got {variant}"),
        ));
    }
    Ok(convolve3x3(buf, &SHARPEN_KERNELS[variant as usize - 1]))
}

fn convolve3x3(mut buf: ImageBuffer, kernel: &[f32; 9]) -> ImageBuffer {
    let (w, h) = (buf.width() as usize, buf.height() as usize);
    if w == 0 || h == 0 {
        return buf;
    }
    let src = buf.as_bytes().to_vec();
    let stride = buf.stride();
    let dst = buf.as_bytes_mut();
    for y in 0..h {
        let rows = [
            reflect101(y as isize - 1, h),
            y,
            reflect101(y as isize + 1, h),
        ];
        for x in 0..w {
            let cols = [
                reflect101(x as isize - 1, w),
                x,
                reflect101(x as isize + 1, w),
            ];
            for c in 0..ALPHA {
                let mut acc = 0f32;
                for (ky, &sy) in rows.iter().enumerate() {
                    for (kx, &sx) in cols.iter().enumerate() {
                        acc += kernel[ky * 3 + kx] * src[sy * stride + sx * CHANNELS + c] as f32;
                    }
                }
                dst[y * stride + x * CHANNELS + c] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::ops::testutil::{gray_at, gray_from_fn};

    #[test]
    fn sharpen_kernels_preserve_flat_regions() {
        for (i, k) in SHARPEN_KERNELS.iter().enumerate() {
            let sum: f32 = k.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "kernel {} sums to {sum}", i + 1);
        }
        let buf = ImageBuffer::filled(6, 4, PixelFormat::Rgba8, [90, 120, 30, 77]);
        for variant in 1..=SHARPEN_VARIANTS {
            assert_eq!(sharpen(buf.clone(), variant).unwrap(), buf);
        }
    }

    #[test]
    fn sharpen_boosts_a_lone_dot() {
        let buf = gray_from_fn(5, 5, |x, y| if (x, y) == (2, 2) { 100 } else { 50 });
        let out = sharpen(buf, 1).unwrap();
        // 5*100 - 4*50
        assert_eq!(gray_at(&out, 2, 2), 255);
        // neighbour on the cross: 5*50 - 100 - 3*50
        assert_eq!(gray_at(&out, 2, 1), 0);
        // diagonal is untouched by the cross kernel
        assert_eq!(gray_at(&out, 1, 1), 50);
    }

    #[test]
    fn sharpen_rejects_unknown_variant() {
        let buf = gray_from_fn(3, 3, |_, _| 0);
        for v in [0, 6, 255] {
            assert!(matches!(
                sharpen(buf.clone(), v),
                Err(EnhanceError::InvalidParameter { op: "sharpen", .. })
            ));
        }
    }

    #[test]
    fn gaussian_blur_requires_odd_kernel() {
        let buf = gray_from_fn(8, 8, |x, _| (x * 30) as u8);
        assert!(gaussian_blur(buf.clone(), 4).is_err());
        assert!(gaussian_blur(buf.clone(), 0).is_err());
        let out = gaussian_blur(buf, 5).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
    }

    #[test]
    fn gaussian_blur_keeps_alpha() {
        let buf = ImageBuffer::filled(6, 6, PixelFormat::Rgba8, [200, 10, 10, 255]);
        let out = gaussian_blur(buf, 3).unwrap();
        assert!(out.as_bytes().chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn sigma_matches_kernel_rule() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(5) - 1.1).abs() < 1e-6);
    }

    #[test]
    fn bilateral_output_is_opaque_gray() {
        let buf = ImageBuffer::filled(7, 5, PixelFormat::Bgra8, [200, 40, 40, 30]);
        let out = bilateral_filter(buf, 3).unwrap();
        let px = out.pixel(3, 2).unwrap();
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn bilateral_keeps_hard_edges() {
        let buf = gray_from_fn(10, 4, |x, _| if x < 5 { 0 } else { 255 });
        let out = bilateral_filter(buf, 3).unwrap();
        assert!(gray_at(&out, 4, 1) < 40);
        assert!(gray_at(&out, 5, 1) > 215);
        assert!(bilateral_filter(out, 0).is_err());
    }

    #[test]
    fn sharpen_mirrors_across_the_border() {
        // Columns 100, 60, 20. Mirroring reads column 1 left of column 0;
        // clamping would read column 0 again and give 140.
        let buf = gray_from_fn(3, 3, |x, _| [100, 60, 20][x as usize]);
        let out = sharpen(buf, 1).unwrap();
        assert_eq!(gray_at(&out, 0, 1), 180);
        assert_eq!(gray_at(&out, 0, 0), 180);
    }

    #[test]
    fn bilateral_window_is_a_disc() {
        // Only the corners differ from the centre; a square window would
        // pull the centre up.
        let buf = gray_from_fn(3, 3, |x, y| if x != 1 && y != 1 { 200 } else { 0 });
        let out = bilateral_filter(buf, 3).unwrap();
        assert_eq!(gray_at(&out, 1, 1), 0);
    }

    #[test]
    fn bilateral_mirrors_across_the_border() {
        // Column 0 sees column 1 on both sides; clamping would give 2.
        let buf = gray_from_fn(4, 3, |x, _| if x == 1 { 200 } else { 0 });
        let out = bilateral_filter(buf, 3).unwrap();
        assert_eq!(gray_at(&out, 0, 1), 6);
    }

    #[test]
    fn denoise_leaves_flat_image_unchanged() {
        let buf = ImageBuffer::filled(9, 9, PixelFormat::Rgba8, [120, 60, 30, 255]);
        assert_eq!(denoise(buf.clone()), buf);
    }

    #[test]
    fn denoise_pulls_isolated_speck_toward_background() {
        let buf = gray_from_fn(11, 11, |x, y| if (x, y) == (5, 5) { 140 } else { 128 });
        let out = denoise(buf);
        let v = gray_at(&out, 5, 5);
        assert!(v < 140, "speck stayed at {v}");
        assert!(v >= 128);
    }
}
