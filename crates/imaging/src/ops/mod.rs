//! The fixed catalogue of enhancement operators.
//!
//! Every operator takes an [`ImageBuffer`] and returns its replacement.
//! Parameters are checked before any pixel is touched; a bad parameter
//! produces [`EnhanceError::InvalidParameter`] naming the operator and the
//! dimensions of the buffer it was given.

mod filter;
mod geometry;
mod lines;
mod morphology;
mod threshold;

pub use filter::{bilateral_filter, denoise, gaussian_blur, sharpen, SHARPEN_VARIANTS};
pub use geometry::{crop, resize};
pub use lines::{remove_lines, LineOrientation};
pub use morphology::{
    dilate, erode, morph_close, morph_dilate, morph_erode, morph_open, ElementShape,
    StructuringElement, MAX_ELEMENT_SIDE,
};
pub use threshold::{
    adaptive_threshold, bitwise_not, canny, invert, otsu, to_zero, trunc, ADAPTIVE_OFFSET,
};

use scanfield_core::Rect;
use thiserror::Error;

use crate::buffer::ImageBuffer;

#[derive(Debug, Error, PartialEq)]
pub enum EnhanceError {
    #[error("{op}: region {rect} is not inside the {width}x{height} image")]
    InvalidRegion {
        op: &'static str,
        rect: Rect,
        width: u32,
        height: u32,
    },
    #[error("{op}: {detail} (image {width}x{height})")]
    InvalidParameter {
        op: &'static str,
        detail: String,
        width: u32,
        height: u32,
    },
    #[error("Recipe '{recipe}' cancelled before step {step}")]
    Cancelled { recipe: String, step: usize },
}

pub(crate) fn invalid(
    op: &'static str,
    buf: &ImageBuffer,
    detail: impl Into<String>,
) -> EnhanceError {
    EnhanceError::InvalidParameter {
        op,
        detail: detail.into(),
        width: buf.width(),
        height: buf.height(),
    }
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge
/// sample (`dcb|abcd|cba`).
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n <= 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Clamp an index into `0..n`, repeating the edge sample.
pub(crate) fn replicate(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect101_mirrors_without_edge_repeat() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-3, 1), 0);
    }

    #[test]
    fn replicate_clamps() {
        assert_eq!(replicate(-4, 3), 0);
        assert_eq!(replicate(7, 3), 2);
        assert_eq!(replicate(1, 3), 1);
    }
}
