pub mod buffer;
pub mod ops;
pub mod recipe;
pub mod render;

pub use buffer::{Codec, CodecError, DisplayBitmap, ImageBuffer, PixelFormat};
pub use ops::EnhanceError;
pub use recipe::{CancelFlag, Operation, Recipe};
pub use render::{ImageFileRenderer, PageRenderer, RenderError, RenderOptions, RenderPreset};
