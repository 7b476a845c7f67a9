use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use serde::{Deserialize, Serialize};

use super::{invalid, EnhanceError};
use crate::buffer::{ImageBuffer, ALPHA, CHANNELS};

/// Longest element side a morphology mask can have.
pub const MAX_ELEMENT_SIDE: u32 = 511;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementShape {
    Rect,
    Ellipse,
}

/// Binary mask used by erode/dilate, anchored at its centre `(w/2, h/2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    shape: ElementShape,
    width: u32,
    height: u32,
    mask: Vec<bool>,
}

impl StructuringElement {
    pub fn new(shape: ElementShape, width: u32, height: u32) -> Self {
        match shape {
            ElementShape::Rect => Self::rect(width, height),
            ElementShape::Ellipse => Self::ellipse(width, height),
        }
    }

    /// Sides are clamped to `1..=MAX_ELEMENT_SIDE`.
    pub fn rect(width: u32, height: u32) -> Self {
        let (width, height) = (clamp_side(width), clamp_side(height));
        Self {
            shape: ElementShape::Rect,
            width,
            height,
            mask: vec![true; (width * height) as usize],
        }
    }

    /// Ellipse inscribed in the `width × height` box, rasterized row by row.
    pub fn ellipse(width: u32, height: u32) -> Self {
        let (width, height) = (clamp_side(width), clamp_side(height));
        if width == 1 && height == 1 {
            return Self::rect(1, 1);
        }
        let r = (height / 2) as i64;
        let c = (width / 2) as i64;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
        let mut mask = vec![false; (width * height) as usize];
        for i in 0..height as i64 {
            let dy = i - r;
            if dy.abs() > r {
                continue;
            }
            let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
            let j1 = (c - dx).max(0);
            let j2 = (c + dx + 1).min(width as i64);
            for j in j1..j2 {
                mask[(i * width as i64 + j) as usize] = true;
            }
        }
        Self { shape: ElementShape::Ellipse, width, height, mask }
    }

    pub fn shape(&self) -> ElementShape {
        self.shape
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn anchor(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.mask[(y * self.width + x) as usize]
    }

    fn to_mask(&self) -> Mask {
        let img = GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.contains(x, y) { 255 } else { 0 }])
        });
        let (ax, ay) = self.anchor();
        // Sides are at most 511, so the anchor fits in a byte.
        Mask::from_image(&img, ax as u8, ay as u8)
    }
}

fn clamp_side(n: u32) -> u32 {
    n.clamp(1, MAX_ELEMENT_SIDE)
}

#[derive(Debug, Clone, Copy)]
enum Morph {
    Erode,
    Dilate,
}

/// One colour channel of `buf` as a gray plane.
fn plane(buf: &ImageBuffer, c: usize) -> GrayImage {
    let (w, data) = (buf.width() as usize, buf.as_bytes());
    GrayImage::from_fn(buf.width(), buf.height(), |x, y| {
        Luma([data[(y as usize * w + x as usize) * CHANNELS + c]])
    })
}

fn morph(
    mut buf: ImageBuffer,
    elem: &StructuringElement,
    iterations: u32,
    kind: Morph,
) -> ImageBuffer {
    if buf.width() == 0 || buf.height() == 0 || iterations == 0 {
        return buf;
    }
    let mask = elem.to_mask();
    let run = |mut img: GrayImage| {
        for _ in 0..iterations {
            img = match kind {
                Morph::Erode => grayscale_erode(&img, &mask),
                Morph::Dilate => grayscale_dilate(&img, &mask),
            };
        }
        img
    };

    let planes: Vec<GrayImage> = (0..ALPHA).map(|c| plane(&buf, c)).collect();
    // Gray pages carry three identical planes; filter one and fan it out.
    let outputs: Vec<GrayImage> = if planes.iter().all(|p| *p == planes[0]) {
        let out = run(planes[0].clone());
        vec![out; ALPHA]
    } else {
        planes.into_iter().map(run).collect()
    };

    for (c, out) in outputs.iter().enumerate() {
        for (px, v) in buf.as_bytes_mut().chunks_exact_mut(CHANNELS).zip(out.as_raw()) {
            px[c] = *v;
        }
    }
    buf
}

/// Per-channel minimum over the element, repeated `iterations` times.
/// Element cells that fall outside the image are ignored.
pub fn erode(buf: ImageBuffer, elem: &StructuringElement, iterations: u32) -> ImageBuffer {
    morph(buf, elem, iterations, Morph::Erode)
}

/// Per-channel maximum over the element, repeated `iterations` times.
pub fn dilate(buf: ImageBuffer, elem: &StructuringElement, iterations: u32) -> ImageBuffer {
    morph(buf, elem, iterations, Morph::Dilate)
}

fn check(
    op: &'static str,
    buf: &ImageBuffer,
    kernel: u32,
    iterations: u32,
) -> Result<(), EnhanceError> {
    if kernel == 0 {
        return Err(invalid(op, buf, "kernel size must be positive"));
    }
    if kernel > MAX_ELEMENT_SIDE {
        return Err(invalid(
            op,
            buf,
            format!("kernel size must be at most {MAX_ELEMENT_SIDE}, got {kernel}"),
        ));
    }
    if iterations == 0 {
        return Err(invalid(op, buf, "iterations must be positive"));
    }
    Ok(())
}

/// Opening with a square element: erode `iterations` times, then dilate as often.
pub fn morph_open(
    buf: ImageBuffer,
    kernel: u32,
    iterations: u32,
) -> Result<ImageBuffer, EnhanceError> {
    check("morph_open", &buf, kernel, iterations)?;
    let elem = StructuringElement::rect(kernel, kernel);
    Ok(dilate(erode(buf, &elem, iterations), &elem, iterations))
}

/// Closing with a square element: dilate `iterations` times, then erode as often.
pub fn morph_close(
    buf: ImageBuffer,
    kernel: u32,
    iterations: u32,
) -> Result<ImageBuffer, EnhanceError> {
    check("morph_close", &buf, kernel, iterations)?;
    let elem = StructuringElement::rect(kernel, kernel);
    Ok(erode(dilate(buf, &elem, iterations), &elem, iterations))
}

/// Erosion with an elliptical element.
pub fn morph_erode(
    buf: ImageBuffer,
    kernel: u32,
    iterations: u32,
) -> Result<ImageBuffer, EnhanceError> {
    check("morph_erode", &buf, kernel, iterations)?;
    Ok(erode(buf, &StructuringElement::ellipse(kernel, kernel), iterations))
}

/// Dilation with an elliptical element.
pub fn morph_dilate(
    buf: ImageBuffer,
    kernel: u32,
    iterations: u32,
) -> Result<ImageBuffer, EnhanceError> {
    check("morph_dilate", &buf, kernel, iterations)?;
    Ok(dilate(buf, &StructuringElement::ellipse(kernel, kernel), iterations))
}
