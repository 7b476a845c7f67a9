pub mod calibration;
pub mod geometry;
pub mod text;

pub use calibration::{BandHeight, Calibration, ConfigError};
pub use geometry::Rect;
pub use text::{contains_folded, AnchorMatch, TextLine};
