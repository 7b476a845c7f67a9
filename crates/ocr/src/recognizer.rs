use scanfield_core::TextLine;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
}

/// Abstraction over a text recognition engine.
///
/// Implementations accept encoded image bytes (PNG, BMP, TIFF) and report
/// coordinates in the pixel space of exactly that image. Calls take
/// `&mut self`: an engine serves one request at a time.
pub trait TextRecognizer {
    /// Full recognized text of the image.
    fn image_to_text(&mut self, image_bytes: &[u8]) -> Result<String, OcrError>;

    /// Every text line the engine detected, in engine order.
    fn text_lines(&mut self, image_bytes: &[u8]) -> Result<Vec<TextLine>, OcrError>;

    /// Lines whose text contains `anchor`, ignoring case. No match is an
    /// empty list, not an error.
    fn text_bounds(&mut self, image_bytes: &[u8], anchor: &str) -> Result<Vec<TextLine>, OcrError> {
        let lines = self.text_lines(image_bytes)?;
        Ok(lines.into_iter().filter(|line| line.contains(anchor)).collect())
    }
}

impl<R: TextRecognizer + ?Sized> TextRecognizer for Box<R> {
    fn image_to_text(&mut self, image_bytes: &[u8]) -> Result<String, OcrError> {
        (**self).image_to_text(image_bytes)
    }

    fn text_lines(&mut self, image_bytes: &[u8]) -> Result<Vec<TextLine>, OcrError> {
        (**self).text_lines(image_bytes)
    }

    fn text_bounds(&mut self, image_bytes: &[u8], anchor: &str) -> Result<Vec<TextLine>, OcrError> {
        (**self).text_bounds(image_bytes, anchor)
    }
}

/// Where the engine finds its trained data and which language to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `<language>.traineddata`; `None` uses the system default.
    pub data_path: Option<PathBuf>,
    pub language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { data_path: None, language: "eng".to_string() }
    }
}

/// Create the engine this build was compiled with.
pub fn open_engine(config: &EngineConfig) -> Result<Box<dyn TextRecognizer>, OcrError> {
    #[cfg(feature = "tesseract")]
    {
        let engine = tesseract_backend::TesseractRecognizer::new(config)?;
        Ok(Box::new(engine))
    }
    #[cfg(not(feature = "tesseract"))]
    {
        Err(OcrError::EngineUnavailable(format!(
            "no recognition backend compiled in (language '{}'); \
             rebuild with the `tesseract` feature",
            config.language
        )))
    }
}

// ── Scripted backend (always available, used for tests) ──────────────────────

/// Returns preset text and lines, and remembers what it was shown.
///
/// Useful for exercising the extraction pipeline without Tesseract.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer {
    text: String,
    lines: Vec<TextLine>,
    submitted: Vec<(u32, u32)>,
}

impl ScriptedRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn with_lines(mut self, lines: Vec<TextLine>) -> Self {
        self.lines = lines;
        self
    }

    /// Number of recognition requests served so far.
    pub fn calls(&self) -> usize {
        self.submitted.len()
    }

    /// Dimensions of every submitted image, oldest first.
    pub fn submitted(&self) -> &[(u32, u32)] {
        &self.submitted
    }

    fn record(&mut self, image_bytes: &[u8]) -> Result<(), OcrError> {
        let dims = image::ImageReader::new(Cursor::new(image_bytes))
            .with_guessed_format()
            .map_err(|e| OcrError::ImageDecode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
        self.submitted.push(dims);
        Ok(())
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn image_to_text(&mut self, image_bytes: &[u8]) -> Result<String, OcrError> {
        self.record(image_bytes)?;
        Ok(self.text.clone())
    }

    fn text_lines(&mut self, image_bytes: &[u8]) -> Result<Vec<TextLine>, OcrError> {
        self.record(image_bytes)?;
        Ok(self.lines.clone())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{EngineConfig, OcrError, TextRecognizer};
    use leptess::{capi, LepTess};
    use scanfield_core::{Rect, TextLine};

    /// One initialized Tesseract instance, reused for every call.
    pub struct TesseractRecognizer {
        lt: LepTess,
    }

    impl TesseractRecognizer {
        pub fn new(config: &EngineConfig) -> Result<Self, OcrError> {
            let data_path = config.data_path.as_ref().map(|p| p.to_string_lossy().into_owned());
            let lt = LepTess::new(data_path.as_deref(), &config.language)
                .map_err(|e| OcrError::EngineUnavailable(e.to_string()))?;
            Ok(Self { lt })
        }

        fn load(&mut self, image_bytes: &[u8]) -> Result<(), OcrError> {
            self.lt
                .set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn image_to_text(&mut self, image_bytes: &[u8]) -> Result<String, OcrError> {
            self.load(image_bytes)?;
            self.lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }

        fn text_lines(&mut self, image_bytes: &[u8]) -> Result<Vec<TextLine>, OcrError> {
            self.load(image_bytes)?;
            let Some(boxes) = self
                .lt
                .get_component_boxes(capi::TessPageIteratorLevel_RIL_TEXTLINE, true)
            else {
                return Ok(Vec::new());
            };
            let mut lines = Vec::new();
            for b in &boxes {
                let v = b.get_val();
                self.lt.set_rectangle_from_box(&b);
                let text = self.lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
                let bounds = Rect::new(
                    v.x.max(0) as u32,
                    v.y.max(0) as u32,
                    v.w.max(0) as u32,
                    v.h.max(0) as u32,
                );
                lines.push(TextLine::new(text.trim_end(), bounds));
            }
            Ok(lines)
        }
    }
}
