use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned integer rectangle in pixel space.
///
/// Fields are unsigned, so a `Rect` can never carry a negative size. Whether
/// it is usable as a crop region depends on the image it is applied to; see
/// [`Rect::fits_within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// The zero rectangle reported when no anchor line was found.
    pub const EMPTY: Rect = Rect { x: 0, y: 0, width: 0, height: 0 };

    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect { x, y, width, height }
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the rectangle has positive size and lies entirely inside a
    /// `width × height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.right() <= width as u64 && self.bottom() <= height as u64
    }

    /// Map a rectangle measured on an image magnified by `factor` back onto
    /// the unmagnified image. Every field is divided and truncated.
    pub fn unscale(&self, factor: f64) -> Rect {
        if factor <= 0.0 || !factor.is_finite() {
            return *self;
        }
        let div = |v: u32| (v as f64 / factor) as u32;
        Rect {
            x: div(self.x),
            y: div(self.y),
            width: div(self.width),
            height: div(self.height),
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_and_right_do_not_overflow() {
        let r = Rect::new(u32::MAX, u32::MAX, 10, 10);
        assert_eq!(r.right(), u32::MAX as u64 + 10);
        assert_eq!(r.bottom(), u32::MAX as u64 + 10);
        assert!(!r.fits_within(u32::MAX, u32::MAX));
    }

    #[test]
    fn fits_within_requires_positive_size() {
        assert!(Rect::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(!Rect::new(0, 0, 0, 10).fits_within(10, 10));
        assert!(!Rect::new(1, 0, 10, 10).fits_within(10, 10));
        assert!(!Rect::EMPTY.fits_within(10, 10));
    }

    #[test]
    fn unscale_divides_every_field() {
        let r = Rect::new(100, 200, 300, 40).unscale(2.0);
        assert_eq!(r, Rect::new(50, 100, 150, 20));
    }

    #[test]
    fn unscale_truncates() {
        let r = Rect::new(101, 3, 7, 1).unscale(2.0);
        assert_eq!(r, Rect::new(50, 1, 3, 0));
    }

    #[test]
    fn unscale_ignores_nonsense_factor() {
        let r = Rect::new(1, 2, 3, 4);
        assert_eq!(r.unscale(0.0), r);
        assert_eq!(r.unscale(f64::NAN), r);
    }

    #[test]
    fn display_format() {
        assert_eq!(Rect::new(1, 2, 3, 4).to_string(), "(1, 2, 3x4)");
    }
}
