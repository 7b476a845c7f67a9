use scanfield_core::Rect;
use scanfield_imaging::{CancelFlag, ImageFileRenderer, PixelFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ExtractorConfig;
use crate::extractor::{ExtractError, FieldExtraction, ReceiptFieldExtractor};
use crate::hash;
use crate::recognizer::TextRecognizer;

/// File extensions picked up from an intake folder.
pub const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// The result of a single page processing run.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub source: Option<PathBuf>,
    /// SHA-256 hex digest of the decoded page pixels.
    pub page_digest: String,
    pub page_width: u32,
    pub page_height: u32,
    pub extraction: FieldExtraction,
}

/// Serializable view of a report, without the preview pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub source: Option<PathBuf>,
    pub page_digest: String,
    pub page_width: u32,
    pub page_height: u32,
    pub text: String,
    pub anchor: Option<Rect>,
    pub band: Rect,
    pub fallback_height: bool,
    pub preview_width: u32,
    pub preview_height: u32,
}

impl ExtractionReport {
    pub fn summary(&self) -> ReportSummary {
        let ex = &self.extraction;
        ReportSummary {
            source: self.source.clone(),
            page_digest: self.page_digest.clone(),
            page_width: self.page_width,
            page_height: self.page_height,
            text: ex.text.clone(),
            anchor: ex.anchor.is_found().then(|| ex.anchor.rect()),
            band: ex.band,
            fallback_height: ex.fallback_height,
            preview_width: ex.preview.width(),
            preview_height: ex.preview.height(),
        }
    }
}

/// Owns one recognition engine for its whole lifetime and runs pages
/// through it: decode → digest → locate → crop → clean → read.
pub struct ExtractionSession<R: TextRecognizer> {
    engine: R,
    extractor: ReceiptFieldExtractor,
    cancel: CancelFlag,
}

impl<R: TextRecognizer> ExtractionSession<R> {
    pub fn new(engine: R, config: ExtractorConfig) -> Self {
        Self {
            engine,
            extractor: ReceiptFieldExtractor::new(config),
            cancel: CancelFlag::new(),
        }
    }

    /// Share an existing cancellation flag, e.g. one wired to ctrl-c.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that stops the current and future runs between recipe steps.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &R {
        &self.engine
    }

    pub fn extractor(&self) -> &ReceiptFieldExtractor {
        &self.extractor
    }

    /// Process a file on disk.
    pub async fn process_file(&mut self, path: &Path) -> Result<ExtractionReport, ExtractError> {
        let bytes = tokio::fs::read(path).await?;
        let mut report = self.process_bytes(&bytes)?;
        report.source = Some(path.to_path_buf());
        Ok(report)
    }

    /// Blocking variant of [`Self::process_file`] for worker threads.
    pub fn process_path(&mut self, path: &Path) -> Result<ExtractionReport, ExtractError> {
        let bytes = std::fs::read(path)?;
        let mut report = self.process_bytes(&bytes)?;
        report.source = Some(path.to_path_buf());
        Ok(report)
    }

    /// Process an encoded page (PNG, JPEG, TIFF, ...).
    pub fn process_bytes(&mut self, data: &[u8]) -> Result<ExtractionReport, ExtractError> {
        let renderer = ImageFileRenderer::from_bytes(data, PixelFormat::Bgra8)?;
        let page = self.extractor.config().render.render(&renderer, 0)?;
        let page_digest = hash::to_hex(&hash::page_digest(&page));
        debug!(digest = %page_digest, width = page.width(), height = page.height(), "Page decoded");

        let extraction = self
            .extractor
            .extract_with_cancel(&mut self.engine, &page, &self.cancel)?;
        info!(digest = %page_digest, "Page processed");
        Ok(ExtractionReport {
            source: None,
            page_digest,
            page_width: page.width(),
            page_height: page.height(),
            extraction,
        })
    }
}

/// Whether `path` names a raster page the intake folder should pick up.
pub fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.iter().any(|p| p.eq_ignore_ascii_case(ext)))
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends new page images to `tx`.
/// Returns the watcher; it must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::event::{ModifyKind, RenameMode};
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            let arrived = matches!(
                ev.kind,
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            );
            if arrived {
                for path in ev.paths.into_iter().filter(|p| is_page_image(p)) {
                    let _ = tx.try_send(path);
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
