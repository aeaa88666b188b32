use crate::config::{ClassificationConfig, Config, LocationsConfig, OcrConfig};

/// The slice of configuration the stages read.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub locations: LocationsConfig,
    pub classification: ClassificationConfig,
    pub ocr: OcrConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locations: config.locations.clone(),
            classification: config.classification.clone(),
            ocr: config.ocr.clone(),
        }
    }

    /// Test and embedding helper: default locations with a classifier set.
    pub fn with_classifier(model_id: &str) -> Self {
        Self {
            classification: ClassificationConfig {
                model_id: Some(model_id.to_string()),
            },
            ..Default::default()
        }
    }
}
