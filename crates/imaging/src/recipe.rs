//! Named, ordered chains of enhancement operators.
//!
//! A [`Recipe`] is plain data: it serializes to TOML or JSON, so the tuned
//! chains can be swapped per receipt template without recompiling.

use scanfield_core::{ConfigError, Rect};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::buffer::ImageBuffer;
use crate::ops::{self, EnhanceError, LineOrientation, MAX_ELEMENT_SIDE, SHARPEN_VARIANTS};

fn default_sharpen() -> u8 {
    1
}
fn default_threshold() -> u8 {
    127
}
fn default_block() -> u32 {
    3
}
fn default_kernel() -> u32 {
    3
}
fn default_iterations() -> u32 {
    1
}
fn default_canny_low() -> f32 {
    150.0
}
fn default_canny_high() -> f32 {
    200.0
}
fn default_line_length() -> u32 {
    130
}
fn default_mask_threshold() -> u8 {
    40
}
fn default_horizontal_erosions() -> u32 {
    2
}
fn default_vertical_erosions() -> u32 {
    3
}

/// One step of a recipe: an operator plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Resize {
        factor: f64,
    },
    Crop {
        rect: Rect,
    },
    Denoise,
    GaussianBlur {
        #[serde(default = "default_kernel")]
        kernel: u32,
    },
    BilateralFilter {
        #[serde(default = "default_kernel")]
        diameter: u32,
    },
    Sharpen {
        #[serde(default = "default_sharpen")]
        variant: u8,
    },
    Invert {
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    BitwiseNot,
    AdaptiveThreshold {
        #[serde(default = "default_block")]
        block: u32,
    },
    Otsu,
    ToZero {
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    Trunc {
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    MorphOpen {
        #[serde(default = "default_kernel")]
        kernel: u32,
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    MorphClose {
        #[serde(default = "default_kernel")]
        kernel: u32,
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    MorphErode {
        #[serde(default = "default_kernel")]
        kernel: u32,
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    MorphDilate {
        #[serde(default = "default_kernel")]
        kernel: u32,
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    Canny {
        #[serde(default = "default_canny_low")]
        low: f32,
        #[serde(default = "default_canny_high")]
        high: f32,
    },
    RemoveHorizontalLines {
        #[serde(default = "default_line_length")]
        length: u32,
        #[serde(default = "default_mask_threshold")]
        mask_threshold: u8,
        #[serde(default = "default_horizontal_erosions")]
        mask_erosions: u32,
    },
    RemoveVerticalLines {
        #[serde(default = "default_line_length")]
        length: u32,
        #[serde(default = "default_mask_threshold")]
        mask_threshold: u8,
        #[serde(default = "default_vertical_erosions")]
        mask_erosions: u32,
    },
}

impl Operation {
    pub fn sharpen(variant: u8) -> Self {
        Operation::Sharpen { variant }
    }

    pub fn resize(factor: f64) -> Self {
        Operation::Resize { factor }
    }

    pub fn remove_horizontal_lines() -> Self {
        Operation::RemoveHorizontalLines {
            length: default_line_length(),
            mask_threshold: default_mask_threshold(),
            mask_erosions: default_horizontal_erosions(),
        }
    }

    pub fn remove_vertical_lines() -> Self {
        Operation::RemoveVerticalLines {
            length: default_line_length(),
            mask_threshold: default_mask_threshold(),
            mask_erosions: default_vertical_erosions(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resize { .. } => "resize",
            Operation::Crop { .. } => "crop",
            Operation::Denoise => "denoise",
            Operation::GaussianBlur { .. } => "gaussian_blur",
            Operation::BilateralFilter { .. } => "bilateral_filter",
            Operation::Sharpen { .. } => "sharpen",
            Operation::Invert { .. } => "invert",
            Operation::BitwiseNot => "bitwise_not",
            Operation::AdaptiveThreshold { .. } => "adaptive_threshold",
            Operation::Otsu => "otsu",
            Operation::ToZero { .. } => "to_zero",
            Operation::Trunc { .. } => "trunc",
            Operation::MorphOpen { .. } => "morph_open",
            Operation::MorphClose { .. } => "morph_close",
            Operation::MorphErode { .. } => "morph_erode",
            Operation::MorphDilate { .. } => "morph_dilate",
            Operation::Canny { .. } => "canny",
            Operation::RemoveHorizontalLines { .. } => "remove_horizontal_lines",
            Operation::RemoveVerticalLines { .. } => "remove_vertical_lines",
        }
    }

    /// Factor this step scales the image by; 1 for everything but `resize`.
    pub fn scale_factor(&self) -> f64 {
        match self {
            Operation::Resize { factor } => *factor,
            _ => 1.0,
        }
    }

    /// Check the parameters against an input of `width × height` and return
    /// the dimensions of the output. No pixels are touched.
    pub fn validate(&self, width: u32, height: u32) -> Result<(u32, u32), EnhanceError> {
        let bad = |detail: String| EnhanceError::InvalidParameter {
            op: self.name(),
            detail,
            width,
            height,
        };
        match *self {
            Operation::Resize { factor } => {
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(bad(format!("scale factor must be positive, got {factor}")));
                }
                let w = (width as f64 * factor).round();
                let h = (height as f64 * factor).round();
                if w < 1.0 || h < 1.0 {
                    return Err(bad(format!("scale factor {factor} collapses the image")));
                }
                if w > u32::MAX as f64 || h > u32::MAX as f64 {
                    return Err(bad(format!("scale factor {factor} overflows the image size")));
                }
                Ok((w as u32, h as u32))
            }
            Operation::Crop { rect } => {
                if rect.fits_within(width, height) {
                    Ok((rect.width, rect.height))
                } else {
                    Err(EnhanceError::InvalidRegion { op: "crop", rect, width, height })
                }
            }
            Operation::GaussianBlur { kernel } if kernel == 0 || kernel % 2 == 0 => {
                Err(bad(format!("kernel size must be odd and positive, got {kernel}")))
            }
            Operation::BilateralFilter { diameter: 0 } => {
                Err(bad("diameter must be positive".into()))
            }
            Operation::Sharpen { variant } if !(1..=SHARPEN_VARIANTS).contains(&variant) => {
                Err(bad(format!("variant must be 1..={SHARPEN_VARIANTS}, got {variant}")))
            }
            Operation::AdaptiveThreshold { block } if block < 3 || block % 2 == 0 => {
                Err(bad(format!("block size must be odd and at least 3, got {block}")))
            }
            Operation::MorphOpen { kernel, iterations }
            | Operation::MorphClose { kernel, iterations }
            | Operation::MorphErode { kernel, iterations }
            | Operation::MorphDilate { kernel, iterations }
                if kernel == 0 || iterations == 0 || kernel > MAX_ELEMENT_SIDE =>
            {
                Err(bad(format!(
                    "kernel size must be 1..={MAX_ELEMENT_SIDE} and iterations positive, \
                     got ({kernel}, {iterations})"
                )))
            }
            Operation::Canny { low, high } if !(low >= 0.0 && high >= low) => Err(bad(format!(
                "thresholds must satisfy 0 <= low <= high, got ({low}, {high})"
            ))),
            Operation::RemoveHorizontalLines { length, .. }
            | Operation::RemoveVerticalLines { length, .. }
                if length == 0 || length > MAX_ELEMENT_SIDE =>
            {
                Err(bad(format!("line length must be 1..={MAX_ELEMENT_SIDE}, got {length}")))
            }
            _ => Ok((width, height)),
        }
    }

    pub fn apply(&self, buf: ImageBuffer) -> Result<ImageBuffer, EnhanceError> {
        match *self {
            Operation::Resize { factor } => ops::resize(buf, factor),
            Operation::Crop { rect } => ops::crop(&buf, rect),
            Operation::Denoise => Ok(ops::denoise(buf)),
            Operation::GaussianBlur { kernel } => ops::gaussian_blur(buf, kernel),
            Operation::BilateralFilter { diameter } => ops::bilateral_filter(buf, diameter),
            Operation::Sharpen { variant } => ops::sharpen(buf, variant),
            Operation::Invert { threshold } => Ok(ops::invert(buf, threshold)),
            Operation::BitwiseNot => Ok(ops::bitwise_not(buf)),
            Operation::AdaptiveThreshold { block } => ops::adaptive_threshold(buf, block),
            Operation::Otsu => Ok(ops::otsu(buf)),
            Operation::ToZero { threshold } => Ok(ops::to_zero(buf, threshold)),
            Operation::Trunc { threshold } => Ok(ops::trunc(buf, threshold)),
            Operation::MorphOpen { kernel, iterations } => {
                ops::morph_open(buf, kernel, iterations)
            }
            Operation::MorphClose { kernel, iterations } => {
                ops::morph_close(buf, kernel, iterations)
            }
            Operation::MorphErode { kernel, iterations } => {
                ops::morph_erode(buf, kernel, iterations)
            }
            Operation::MorphDilate { kernel, iterations } => {
                ops::morph_dilate(buf, kernel, iterations)
            }
            Operation::Canny { low, high } => ops::canny(buf, low, high),
            Operation::RemoveHorizontalLines { length, mask_threshold, mask_erosions } => {
                let dir = LineOrientation::Horizontal;
                ops::remove_lines(buf, dir, length, mask_threshold, mask_erosions)
            }
            Operation::RemoveVerticalLines { length, mask_threshold, mask_erosions } => {
                let dir = LineOrientation::Vertical;
                ops::remove_lines(buf, dir, length, mask_threshold, mask_erosions)
            }
        }
    }
}

/// Cooperative cancellation shared between a recipe run and its owner.
///
/// Checked between steps only; an operator that has started always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Operation>,
}

impl Recipe {
    pub const LOCALIZATION: &'static str = "localization";
    pub const FIELD_CLEANUP: &'static str = "cleanup";

    pub fn new(name: impl Into<String>, steps: Vec<Operation>) -> Self {
        Self { name: name.into(), steps }
    }

    /// Chain run on the full page before anchor search. Doubles the page.
    pub fn localization() -> Self {
        Self::new(
            Self::LOCALIZATION,
            vec![
                Operation::sharpen(1),
                Operation::Denoise,
                Operation::BilateralFilter { diameter: 3 },
                Operation::resize(2.0),
                Operation::sharpen(3),
                Operation::MorphErode { kernel: 3, iterations: 1 },
            ],
        )
    }

    /// Chain run on the cropped field band before the final read.
    pub fn field_cleanup() -> Self {
        Self::new(
            Self::FIELD_CLEANUP,
            vec![
                Operation::sharpen(1),
                Operation::BilateralFilter { diameter: 3 },
                Operation::resize(4.0),
                Operation::BitwiseNot,
                Operation::remove_horizontal_lines(),
                Operation::remove_vertical_lines(),
                Operation::ToZero { threshold: default_threshold() },
                Operation::MorphOpen { kernel: 2, iterations: 1 },
                Operation::MorphDilate { kernel: 2, iterations: 1 },
                Operation::resize(0.8),
                Operation::Invert { threshold: default_threshold() },
                Operation::MorphErode { kernel: 2, iterations: 1 },
            ],
        )
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            Self::LOCALIZATION => Some(Self::localization()),
            Self::FIELD_CLEANUP => Some(Self::field_cleanup()),
            _ => None,
        }
    }

    /// Net scale of the whole chain: the product of its resize factors.
    pub fn scale_factor(&self) -> f64 {
        self.steps.iter().map(Operation::scale_factor).product()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let recipe: Recipe = toml::from_str(s)?;
        recipe.check_factors()?;
        Ok(recipe)
    }

    /// Every resize step must scale by a finite positive factor.
    pub fn check_factors(&self) -> Result<(), ConfigError> {
        let degenerate = |op: &&Operation| {
            let f = op.scale_factor();
            !(f.is_finite() && f > 0.0)
        };
        match self.steps.iter().find(degenerate) {
            Some(op) => Err(ConfigError::Invalid(format!(
                "recipe '{}': {} factor must be positive",
                self.name,
                op.name()
            ))),
            None => Ok(()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Walk the steps against an input size without touching pixels,
    /// returning the final output size.
    pub fn validate(&self, width: u32, height: u32) -> Result<(u32, u32), EnhanceError> {
        self.steps
            .iter()
            .try_fold((width, height), |(w, h), op| op.validate(w, h))
    }

    pub fn apply(&self, buf: ImageBuffer) -> Result<ImageBuffer, EnhanceError> {
        self.apply_with_cancel(buf, &CancelFlag::new())
    }

    /// Run every step in order. Parameters of all steps are checked before
    /// the first one runs; `cancel` is polled before each step.
    pub fn apply_with_cancel(
        &self,
        mut buf: ImageBuffer,
        cancel: &CancelFlag,
    ) -> Result<ImageBuffer, EnhanceError> {
        self.validate(buf.width(), buf.height())?;
        for (step, op) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EnhanceError::Cancelled { recipe: self.name.clone(), step });
            }
            buf = op.apply(buf)?;
            debug!(
                recipe = %self.name,
                step,
                op = op.name(),
                width = buf.width(),
                height = buf.height(),
                "Applied enhancement step"
            );
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil::gray_from_fn;

    #[test]
    fn parses_steps_with_defaults() {
        let recipe = Recipe::from_toml_str(
            r#"
            name = "custom"

            [[steps]]
            op = "sharpen"

            [[steps]]
            op = "resize"
            factor = 3

            [[steps]]
            op = "remove_vertical_lines"
            length = 90

            [[steps]]
            op = "denoise"
            "#,
        )
        .unwrap();
        assert_eq!(recipe.name, "custom");
        assert_eq!(
            recipe.steps,
            vec![
                Operation::Sharpen { variant: 1 },
                Operation::Resize { factor: 3.0 },
                Operation::RemoveVerticalLines { length: 90, mask_threshold: 40, mask_erosions: 3 },
                Operation::Denoise,
            ]
        );
    }

    #[test]
    fn unknown_operator_is_a_parse_error() {
        let err = Recipe::from_toml_str("name = \"x\"\n[[steps]]\nop = \"swirl\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builtins_survive_toml_and_json() {
        for name in [Recipe::LOCALIZATION, Recipe::FIELD_CLEANUP] {
            let recipe = Recipe::builtin(name).unwrap();
            let toml = recipe.to_toml_string().unwrap();
            assert_eq!(Recipe::from_toml_str(&toml).unwrap(), recipe);
            let json = serde_json::to_string(&recipe).unwrap();
            assert_eq!(serde_json::from_str::<Recipe>(&json).unwrap(), recipe);
        }
        assert!(Recipe::builtin("nope").is_none());
    }

    #[test]
    fn scale_factor_is_product_of_resizes() {
        assert_eq!(Recipe::localization().scale_factor(), 2.0);
        assert!((Recipe::field_cleanup().scale_factor() - 3.2).abs() < 1e-9);
        assert_eq!(Recipe::new("empty", vec![]).scale_factor(), 1.0);
    }

    #[test]
    fn validate_tracks_dimensions() {
        assert_eq!(Recipe::field_cleanup().validate(100, 10), Ok((320, 32)));
        let crop_after_resize = Recipe::new(
            "r",
            vec![Operation::resize(2.0), Operation::Crop { rect: Rect::new(0, 0, 20, 20) }],
        );
        assert_eq!(crop_after_resize.validate(10, 10), Ok((20, 20)));
        assert!(crop_after_resize.validate(9, 10).is_err());
    }

    #[test]
    fn bad_late_step_fails_before_any_work() {
        let recipe = Recipe::new(
            "bad",
            vec![Operation::Denoise, Operation::resize(2.0), Operation::sharpen(9)],
        );
        let err = recipe.apply(gray_from_fn(6, 4, |_, _| 10)).unwrap_err();
        match err {
            EnhanceError::InvalidParameter { op, width, height, .. } => {
                assert_eq!((op, width, height), ("sharpen", 12, 8));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_first_step() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = Recipe::localization()
            .apply_with_cancel(gray_from_fn(8, 8, |_, _| 0), &cancel)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::Cancelled { step: 0, .. }));
        cancel.reset();
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn every_step_tolerates_an_empty_buffer() {
        let empty = ImageBuffer::from_raw(0, 0, crate::PixelFormat::Rgba8, vec![]).unwrap();
        let steps = [
            Operation::Denoise,
            Operation::GaussianBlur { kernel: 3 },
            Operation::BilateralFilter { diameter: 3 },
            Operation::sharpen(2),
            Operation::Invert { threshold: 127 },
            Operation::BitwiseNot,
            Operation::AdaptiveThreshold { block: 3 },
            Operation::Otsu,
            Operation::ToZero { threshold: 127 },
            Operation::Trunc { threshold: 127 },
            Operation::MorphOpen { kernel: 3, iterations: 1 },
            Operation::MorphClose { kernel: 3, iterations: 1 },
            Operation::MorphErode { kernel: 3, iterations: 1 },
            Operation::MorphDilate { kernel: 3, iterations: 1 },
            Operation::Canny { low: 150.0, high: 200.0 },
            Operation::remove_horizontal_lines(),
            Operation::remove_vertical_lines(),
        ];
        for op in steps {
            let out = op.apply(empty.clone()).unwrap();
            assert_eq!(out.dimensions(), (0, 0), "{}", op.name());
        }
    }

    #[test]
    fn every_resize_factor_is_checked() {
        let recipe = Recipe::new("twice", vec![Operation::resize(-1.0), Operation::resize(-1.0)]);
        assert_eq!(recipe.scale_factor(), 1.0);
        assert!(matches!(recipe.check_factors(), Err(ConfigError::Invalid(_))));
        assert!(Recipe::field_cleanup().check_factors().is_ok());
    }

    #[test]
    fn oversized_elements_fail_validation() {
        let recipe = Recipe::new(
            "wide",
            vec![Operation::RemoveHorizontalLines {
                length: MAX_ELEMENT_SIDE + 1,
                mask_threshold: 40,
                mask_erosions: 2,
            }],
        );
        assert!(matches!(
            recipe.validate(10, 10),
            Err(EnhanceError::InvalidParameter { op: "remove_horizontal_lines", .. })
        ));
    }

    #[test]
    fn localization_doubles_the_page() {
        let page =
            gray_from_fn(40, 30, |x, y| if (10..30).contains(&x) && y == 15 { 0 } else { 230 });
        let out = Recipe::localization().apply(page).unwrap();
        assert_eq!(out.dimensions(), (80, 60));
    }
}
