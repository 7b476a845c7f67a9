use scanfield_core::{AnchorMatch, Rect};
use scanfield_imaging::{CancelFlag, Codec, ImageBuffer, Recipe};
use tracing::{debug, warn};

use crate::extractor::ExtractError;
use crate::recognizer::TextRecognizer;

/// Outcome of the anchor search. A miss is an expected result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorLocation {
    Found(AnchorMatch),
    NotFound,
}

impl AnchorLocation {
    /// Anchor rectangle in page space; [`Rect::EMPTY`] when nothing matched.
    pub fn rect(&self) -> Rect {
        match self {
            AnchorLocation::Found(m) => m.page_bounds,
            AnchorLocation::NotFound => Rect::EMPTY,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, AnchorLocation::Found(_))
    }
}

/// Finds the anchor line on a full page.
#[derive(Debug, Clone)]
pub struct RegionLocator<'a> {
    anchor: &'a str,
    recipe: &'a Recipe,
}

impl<'a> RegionLocator<'a> {
    pub fn new(anchor: &'a str, recipe: &'a Recipe) -> Self {
        Self { anchor, recipe }
    }

    /// Enhance a copy of `page`, ask the engine for lines containing the
    /// anchor and map the first hit back onto `page`.
    pub fn locate<R: TextRecognizer + ?Sized>(
        &self,
        engine: &mut R,
        page: &ImageBuffer,
        cancel: &CancelFlag,
    ) -> Result<AnchorLocation, ExtractError> {
        let enhanced = self.recipe.apply_with_cancel(page.clone(), cancel)?;
        let bytes = enhanced.encode(Codec::Png)?;
        let hits = engine.text_bounds(&bytes, self.anchor)?;
        debug!(anchor = self.anchor, hits = hits.len(), "Anchor search finished");

        let Some(line) = hits.into_iter().next() else {
            warn!(anchor = self.anchor, "Anchor line not found on page");
            return Ok(AnchorLocation::NotFound);
        };
        let page_bounds = line.bounds.unscale(self.recipe.scale_factor());
        debug!(line = %line.bounds, page = %page_bounds, "Anchor mapped to page space");
        Ok(AnchorLocation::Found(AnchorMatch {
            anchor: self.anchor.to_string(),
            line,
            page_bounds,
        }))
    }
}
