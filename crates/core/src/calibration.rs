use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Template-specific constants that position the field band relative to the
/// anchor line.
///
/// The defaults were tuned against a single receipt layout. They are not
/// derived from anything and must be re-measured for every new template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Substring that identifies the anchor line (matched case-insensitively).
    pub anchor_text: String,
    /// Pixels between the bottom of the field band and the bottom of the page.
    pub bottom_margin_px: u32,
    /// Share of the space below the anchor used when `bottom_margin_px`
    /// would leave no room.
    pub fallback_ratio: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            anchor_text: "description".to_string(),
            bottom_margin_px: 430,
            fallback_ratio: 0.53,
        }
    }
}

/// Height of the field band below the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandHeight {
    pub height: u32,
    /// Set when the fixed margin overshot and `fallback_ratio` was used.
    pub fallback: bool,
}

impl Calibration {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cal: Calibration = toml::from_str(s)?;
        cal.validate()?;
        Ok(cal)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anchor_text.trim().is_empty() {
            return Err(ConfigError::Invalid("anchor_text must not be empty".into()));
        }
        if !(self.fallback_ratio > 0.0 && self.fallback_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_ratio must be in (0, 1], got {}",
                self.fallback_ratio
            )));
        }
        Ok(())
    }

    /// Height of the band that starts at `anchor_bottom` on a page of
    /// `page_height` pixels.
    pub fn band_height(&self, page_height: u32, anchor_bottom: u64) -> BandHeight {
        let below = page_height as i64 - anchor_bottom as i64;
        let raw = below - self.bottom_margin_px as i64;
        if raw > 0 {
            return BandHeight { height: raw as u32, fallback: false };
        }
        let height = (below.max(0) as f64 * self.fallback_ratio) as u32;
        BandHeight { height, fallback: true }
    }
}
