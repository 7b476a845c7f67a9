use scanfield_core::Rect;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::buffer::{CodecError, ImageBuffer, PixelFormat, ALPHA, CHANNELS};
use crate::ops::{self, EnhanceError};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Page {index} requested but the document has {count} page(s)")]
    PageOutOfRange { index: usize, count: usize },
    #[error("Failed to read page source: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
}

/// How a page is rasterized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Output scale relative to the page's native pixel size.
    pub scale: f64,
    /// Render only this part of the page, in native page pixels.
    pub source_rect: Option<Rect>,
    /// Opaque RGB colour the page is composited over. `None` keeps alpha.
    pub background: Option<[u8; 3]>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { scale: 1.0, source_rect: None, background: None }
    }
}

/// The three ways a page can be viewed before extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPreset {
    /// Native size over white.
    #[default]
    ActualSize,
    /// Half size over beige.
    HalfSize,
    /// The middle half of the page in each direction, native size over white.
    CenterCrop,
}

impl RenderPreset {
    pub const WHITE: [u8; 3] = [255, 255, 255];
    pub const BEIGE: [u8; 3] = [245, 245, 220];

    /// Options for a page whose native size is `width × height`.
    pub fn options(self, width: u32, height: u32) -> RenderOptions {
        match self {
            RenderPreset::ActualSize => {
                RenderOptions { background: Some(Self::WHITE), ..Default::default() }
            }
            RenderPreset::HalfSize => RenderOptions {
                scale: 0.5,
                source_rect: None,
                background: Some(Self::BEIGE),
            },
            RenderPreset::CenterCrop => RenderOptions {
                scale: 1.0,
                source_rect: Some(Rect::new(width / 4, height / 4, width / 2, height / 2)),
                background: Some(Self::WHITE),
            },
        }
    }

    pub fn render<R: PageRenderer + ?Sized>(
        self,
        renderer: &R,
        index: usize,
    ) -> Result<ImageBuffer, RenderError> {
        let (width, height) = renderer.page_size(index)?;
        renderer.render(index, &self.options(width, height))
    }
}

/// Source of page rasters. PDF and other document formats plug in here.
pub trait PageRenderer {
    fn page_count(&self) -> usize;

    /// Native pixel size of a page.
    fn page_size(&self, index: usize) -> Result<(u32, u32), RenderError>;

    fn render(&self, index: usize, options: &RenderOptions) -> Result<ImageBuffer, RenderError>;
}

/// A single already-rasterized page (PNG, JPEG, TIFF, ...).
#[derive(Debug, Clone)]
pub struct ImageFileRenderer {
    page: ImageBuffer,
}

impl ImageFileRenderer {
    pub fn from_buffer(page: ImageBuffer) -> Self {
        Self { page }
    }

    pub fn from_bytes(bytes: &[u8], format: PixelFormat) -> Result<Self, RenderError> {
        Ok(Self::from_buffer(ImageBuffer::decode(bytes, format)?))
    }

    pub fn open(path: &Path, format: PixelFormat) -> Result<Self, RenderError> {
        Self::from_bytes(&std::fs::read(path)?, format)
    }
}

impl PageRenderer for ImageFileRenderer {
    fn page_count(&self) -> usize {
        1
    }

    fn page_size(&self, index: usize) -> Result<(u32, u32), RenderError> {
        if index >= self.page_count() {
            return Err(RenderError::PageOutOfRange { index, count: self.page_count() });
        }
        Ok(self.page.dimensions())
    }

    fn render(&self, index: usize, options: &RenderOptions) -> Result<ImageBuffer, RenderError> {
        self.page_size(index)?;
        let mut page = match options.source_rect {
            Some(rect) => ops::crop(&self.page, rect)?,
            None => self.page.clone(),
        };
        if options.scale != 1.0 {
            page = ops::resize(page, options.scale)?;
        }
        if let Some(bg) = options.background {
            composite_over(&mut page, bg);
        }
        Ok(page)
    }
}

fn composite_over(buf: &mut ImageBuffer, rgb: [u8; 3]) {
    let offsets = buf.format().rgb_offsets();
    for px in buf.as_bytes_mut().chunks_exact_mut(CHANNELS) {
        let a = px[ALPHA] as u32;
        for (&o, &bg) in offsets.iter().zip(&rgb) {
            px[o] = ((px[o] as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
        }
        px[ALPHA] = 255;
    }
}
