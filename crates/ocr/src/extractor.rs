use scanfield_core::Rect;
use scanfield_imaging::{
    ops, CancelFlag, Codec, CodecError, DisplayBitmap, EnhanceError, ImageBuffer, RenderError,
};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ExtractorConfig;
use crate::locator::{AnchorLocation, RegionLocator};
use crate::recognizer::{OcrError, TextRecognizer};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Image enhancement failed: {0}")]
    Enhance(#[from] EnhanceError),
    #[error("Image encoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Page rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of reading the field below the anchor on one page.
#[derive(Debug, Clone)]
pub struct FieldExtraction {
    /// Recognized text of the field band.
    pub text: String,
    /// Cleaned band at preview scale, ready for display.
    pub preview: DisplayBitmap,
    pub anchor: AnchorLocation,
    /// Region of the original page that was read.
    pub band: Rect,
    /// True when the calibrated margin left no room and the ratio was used.
    pub fallback_height: bool,
}

/// Locates the anchor line, crops the band under it and reads it.
///
/// Makes exactly two recognition calls per page: one anchor search on the
/// enhanced full page and one read of the cleaned band.
#[derive(Debug, Clone, Default)]
pub struct ReceiptFieldExtractor {
    config: ExtractorConfig,
}

impl ReceiptFieldExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn locator(&self) -> RegionLocator<'_> {
        RegionLocator::new(&self.config.calibration.anchor_text, &self.config.localization)
    }

    /// Region below `anchor` that holds the field, and whether the fallback
    /// height was used.
    pub fn field_band(&self, page: &ImageBuffer, anchor: Rect) -> (Rect, bool) {
        let top = u32::try_from(anchor.bottom()).unwrap_or(u32::MAX);
        let band = self.config.calibration.band_height(page.height(), anchor.bottom());
        (Rect::new(0, top, page.width(), band.height), band.fallback)
    }

    pub fn extract<R: TextRecognizer + ?Sized>(
        &self,
        engine: &mut R,
        page: &ImageBuffer,
    ) -> Result<FieldExtraction, ExtractError> {
        self.extract_with_cancel(engine, page, &CancelFlag::new())
    }

    pub fn extract_with_cancel<R: TextRecognizer + ?Sized>(
        &self,
        engine: &mut R,
        page: &ImageBuffer,
        cancel: &CancelFlag,
    ) -> Result<FieldExtraction, ExtractError> {
        let started = Instant::now();
        let anchor = self.locator().locate(engine, page, cancel)?;

        let (band, fallback_height) = self.field_band(page, anchor.rect());
        debug!(%band, fallback_height, "Field band chosen");
        let crop = ops::crop(page, band)?;
        let cleaned = self.config.cleanup.apply_with_cancel(crop, cancel)?;

        let text = engine.image_to_text(&cleaned.encode(Codec::Png)?)?;
        let preview = ops::resize(cleaned, self.config.preview_scale)?.to_display_bitmap();

        info!(
            anchor_found = anchor.is_found(),
            %band,
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Field extracted"
        );
        Ok(FieldExtraction { text, preview, anchor, band, fallback_height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::ScriptedRecognizer;
    use scanfield_core::TextLine;
    use scanfield_imaging::PixelFormat;

    fn page(w: u32, h: u32) -> ImageBuffer {
        ImageBuffer::filled(w, h, PixelFormat::Bgra8, [240, 240, 240, 255])
    }

    #[test]
    fn band_uses_margin_then_fallback() {
        let ex = ReceiptFieldExtractor::default();
        let p = page(50, 1000);
        let margin = ex.field_band(&p, Rect::new(0, 260, 40, 40));
        assert_eq!(margin, (Rect::new(0, 300, 50, 270), false));
        let fallback = ex.field_band(&p, Rect::new(0, 780, 40, 20));
        assert_eq!(fallback, (Rect::new(0, 800, 50, 106), true));
    }

    #[test]
    fn found_anchor_drives_the_band() {
        // Anchor at y 200..240 in doubled space lands at 100..120 on the page.
        let mut engine = ScriptedRecognizer::new("Widget, blue")
            .with_lines(vec![TextLine::new("Description", Rect::new(20, 200, 100, 40))]);
        let out = ReceiptFieldExtractor::default().extract(&mut engine, &page(60, 600)).unwrap();
        assert_eq!(out.text, "Widget, blue");
        assert_eq!(out.anchor.rect(), Rect::new(10, 100, 50, 20));
        assert_eq!(out.band, Rect::new(0, 120, 60, 50));
        assert!(!out.fallback_height);
        assert_eq!(engine.calls(), 2);
        // Second submission is the cleaned band: 60x50 scaled by 4 then 0.8.
        assert_eq!(engine.submitted()[1], (192, 160));
        assert_eq!((out.preview.width(), out.preview.height()), (96, 80));
    }

    #[test]
    fn missing_anchor_reads_from_the_top() {
        let mut engine = ScriptedRecognizer::new("fallback text");
        let out = ReceiptFieldExtractor::default().extract(&mut engine, &page(40, 500)).unwrap();
        assert_eq!(out.anchor, AnchorLocation::NotFound);
        assert_eq!(out.band, Rect::new(0, 0, 40, 70));
        assert_eq!(out.text, "fallback text");
        assert_eq!(engine.calls(), 2);
    }

    /// Letter-sized page at 150 dpi with a header rule, an anchor row of
    /// glyph blocks and a few field rows under it.
    fn synthetic_receipt() -> ImageBuffer {
        let mut p = page(1200, 1600);
        let mut fill = |x0: u32, y0: u32, w: u32, h: u32, v: u8| {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    p.set_pixel(x, y, [v, v, v, 255]);
                }
            }
        };
        fill(60, 180, 1080, 3, 20);
        for i in 0..11 {
            fill(80 + i * 26, 955, 18, 24, 30);
        }
        for row in 0..4 {
            for i in 0..20 {
                fill(80 + i * 22, 1010 + row * 36, 14, 20, 40);
            }
        }
        p
    }

    #[test]
    fn full_page_end_to_end() {
        let page = synthetic_receipt();
        // "Description" spans 950..980 on the page; the engine sees it doubled.
        let mut engine = ScriptedRecognizer::new("Widget, blue 2 pcs")
            .with_lines(vec![TextLine::new("Description", Rect::new(160, 1900, 580, 60))]);
        let out = ReceiptFieldExtractor::default().extract(&mut engine, &page).unwrap();

        assert!(!out.text.is_empty());
        assert!(out.preview.height() > 0);
        assert_eq!(engine.calls(), 2);
        assert_eq!(engine.submitted()[0], (2400, 3200));
        assert_eq!(out.anchor.rect(), Rect::new(80, 950, 290, 30));
        assert_eq!(out.band, Rect::new(0, 980, 1200, 190));
        assert_eq!(engine.submitted()[1], (3840, 608));
    }

    #[test]
    fn anchor_at_page_bottom_is_invalid_region() {
        let mut engine = ScriptedRecognizer::new("")
            .with_lines(vec![TextLine::new("description", Rect::new(0, 560, 40, 40))]);
        let err =
            ReceiptFieldExtractor::default().extract(&mut engine, &page(40, 300)).unwrap_err();
        assert!(matches!(err, ExtractError::Enhance(EnhanceError::InvalidRegion { .. })));
        assert_eq!(engine.calls(), 1);
    }
}
