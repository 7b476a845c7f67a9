use serde::{Deserialize, Serialize};

use super::morphology::{dilate, erode, StructuringElement, MAX_ELEMENT_SIDE};
use super::{invalid, EnhanceError};
use crate::buffer::{ImageBuffer, ALPHA, CHANNELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrientation {
    Horizontal,
    Vertical,
}

impl LineOrientation {
    fn element(self, length: u32) -> StructuringElement {
        match self {
            LineOrientation::Horizontal => StructuringElement::rect(length, 1),
            LineOrientation::Vertical => StructuringElement::rect(1, length),
        }
    }
}

/// Blank out bright ruled lines of at least `length` pixels.
///
/// Expects light strokes on a dark background. The opening with a
/// `length × 1` (or `1 × length`) element keeps only the lines; pixels whose
/// opened luma is above `mask_threshold` are marked as line, the mark is
/// widened by `mask_erosions` passes of a 3×3 erosion on the keep-mask, and
/// everything marked is cleared to black. Alpha is untouched.
pub fn remove_lines(
    mut buf: ImageBuffer,
    orientation: LineOrientation,
    length: u32,
    mask_threshold: u8,
    mask_erosions: u32,
) -> Result<ImageBuffer, EnhanceError> {
    if length == 0 || length > MAX_ELEMENT_SIDE {
        return Err(invalid(
            "remove_lines",
            &buf,
            format!("line length must be 1..={MAX_ELEMENT_SIDE}, got {length}"),
        ));
    }

    let elem = orientation.element(length);
    let opened = dilate(erode(buf.clone(), &elem, 1), &elem, 1);
    let luma = opened.to_luma();
    let keep = image::GrayImage::from_fn(luma.width(), luma.height(), |x, y| {
        image::Luma([if luma.get_pixel(x, y)[0] > mask_threshold { 0 } else { 255 }])
    });
    let mut mask = ImageBuffer::from_luma(&keep, buf.format());
    if mask_erosions > 0 {
        mask = erode(mask, &StructuringElement::rect(3, 3), mask_erosions);
    }

    let mask = mask.as_bytes();
    for (px, m) in buf
        .as_bytes_mut()
        .chunks_exact_mut(CHANNELS)
        .zip(mask.chunks_exact(CHANNELS))
    {
        for c in 0..ALPHA {
            px[c] &= m[c];
        }
    }
    Ok(buf)
}
