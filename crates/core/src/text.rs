use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// One line of recognized text and its bounding box, in the pixel space of
/// the image that was submitted to the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub bounds: Rect,
}

impl TextLine {
    pub fn new(text: impl Into<String>, bounds: Rect) -> Self {
        Self { text: text.into(), bounds }
    }

    pub fn contains(&self, needle: &str) -> bool {
        contains_folded(&self.text, needle)
    }
}

/// A recognized line that contains the anchor substring, together with its
/// rectangle mapped back onto the original (unmagnified) page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorMatch {
    pub anchor: String,
    pub line: TextLine,
    pub page_bounds: Rect,
}

/// Case-insensitive substring test. An empty needle matches everything.
pub fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
