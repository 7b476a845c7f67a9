pub mod config;
pub mod extractor;
pub mod hash;
pub mod locator;
pub mod pipeline;
pub mod recognizer;

pub use config::ExtractorConfig;
pub use extractor::{ExtractError, FieldExtraction, ReceiptFieldExtractor};
pub use hash::{page_digest, sha256_bytes, to_hex};
pub use locator::{AnchorLocation, RegionLocator};
pub use pipeline::{
    is_page_image, spawn_intake_watcher, ExtractionReport, ExtractionSession, ReportSummary,
};
pub use recognizer::{open_engine, EngineConfig, OcrError, ScriptedRecognizer, TextRecognizer};
