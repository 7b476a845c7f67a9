use scanfield_core::{Calibration, ConfigError};
use scanfield_imaging::{Recipe, RenderPreset};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::recognizer::EngineConfig;

/// Everything one extraction run needs besides the page and the engine.
///
/// All values are tuned for a single receipt template. A TOML file may
/// override any subset; omitted sections keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// How pages are rasterized before anything else runs.
    pub render: RenderPreset,
    /// Scale applied to the cleaned field band before it is shown.
    pub preview_scale: f64,
    pub calibration: Calibration,
    pub engine: EngineConfig,
    /// Chain run on the whole page before the anchor search.
    pub localization: Recipe,
    /// Chain run on the cropped field band before the final read.
    pub cleanup: Recipe,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            render: RenderPreset::ActualSize,
            preview_scale: 0.5,
            calibration: Calibration::default(),
            engine: EngineConfig::default(),
            localization: Recipe::localization(),
            cleanup: Recipe::field_cleanup(),
        }
    }
}

impl ExtractorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ExtractorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;
        if !(self.preview_scale.is_finite() && self.preview_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "preview_scale must be positive, got {}",
                self.preview_scale
            )));
        }
        self.localization.check_factors()?;
        self.cleanup.check_factors()?;
        if self.engine.language.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.language must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfield_imaging::Operation;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(ExtractorConfig::from_toml_str("").unwrap(), ExtractorConfig::default());
    }

    #[test]
    fn sections_override_independently() {
        let config = ExtractorConfig::from_toml_str(
            r#"
            preview_scale = 0.25

            [calibration]
            anchor_text = "Item"

            [engine]
            language = "deu"

            [localization]
            name = "quick"

            [[localization.steps]]
            op = "resize"
            factor = 3.0
            "#,
        )
        .unwrap();
        assert_eq!(config.preview_scale, 0.25);
        assert_eq!(config.calibration.anchor_text, "Item");
        assert_eq!(config.calibration.bottom_margin_px, 430);
        assert_eq!(config.engine.language, "deu");
        assert_eq!(config.localization.steps, vec![Operation::resize(3.0)]);
        assert_eq!(config.localization.scale_factor(), 3.0);
        assert_eq!(config.cleanup, Recipe::field_cleanup());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ExtractorConfig::from_toml_str("preview_scale = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExtractorConfig::from_toml_str("[calibration]\nfallback_ratio = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExtractorConfig::from_toml_str("[[cleanup.steps]]\nop = \"resize\"\nfactor = -1.0"),
            Err(_)
        ));
    }

    #[test]
    fn negative_factors_that_cancel_out_are_rejected() {
        let err = ExtractorConfig::from_toml_str(
            r#"
            [localization]
            name = "flip"

            [[localization.steps]]
            op = "resize"
            factor = -1.0

            [[localization.steps]]
            op = "resize"
            factor = -1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("flip")));
    }

    #[test]
    fn render_preset_is_configurable() {
        assert_eq!(ExtractorConfig::default().render, RenderPreset::ActualSize);
        let config = ExtractorConfig::from_toml_str("render = \"center_crop\"").unwrap();
        assert_eq!(config.render, RenderPreset::CenterCrop);
        assert!(ExtractorConfig::from_toml_str("render = \"sideways\"").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanfield.toml");
        std::fs::write(&path, "[calibration]\nbottom_margin_px = 300\n").unwrap();
        let config = ExtractorConfig::load(&path).unwrap();
        assert_eq!(config.calibration.bottom_margin_px, 300);
        assert!(ExtractorConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
