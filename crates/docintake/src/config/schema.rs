use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::secrets::CredentialSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub capability: CapabilityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub records: RecordStoreConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_watch_interval_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            capability: CapabilityConfig::default(),
            storage: StorageConfig::default(),
            records: RecordStoreConfig::default(),
            classification: ClassificationConfig::default(),
            ocr: OcrConfig::default(),
            locations: LocationsConfig::default(),
            worker_count: default_worker_count(),
            watch_interval_ms: default_watch_interval_ms(),
            log_format: LogFormat::default(),
        }
    }
}

/// Document-understanding service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub key: CredentialSource,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_api_version() -> String {
    "2024-11-30".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: CredentialSource::default(),
            api_version: default_api_version(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CapabilityConfig {
    pub fn require_endpoint(&self) -> Result<&str, ConfigError> {
        require("capability.endpoint", self.endpoint.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

fn default_storage_root() -> String {
    "./data/blobs".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "./data/docintake.db".to_string()
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Classifier model every page is submitted to.
    #[serde(default)]
    pub model_id: Option<String>,
}

impl ClassificationConfig {
    pub fn require_model_id(&self) -> Result<&str, ConfigError> {
        require("classification.model_id", self.model_id.as_deref())
    }
}

/// Which OCR model handles which document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_model")]
    pub default_model: String,
    /// Lowercased document type -> OCR model id.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

fn default_ocr_model() -> String {
    "prebuilt-read".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            default_model: default_ocr_model(),
            models: BTreeMap::new(),
        }
    }
}

impl OcrConfig {
    pub fn model_for(&self, document_type: &str) -> &str {
        self.models
            .get(&document_type.to_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

/// Storage location names by pipeline role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationsConfig {
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_backup")]
    pub backup: String,
    #[serde(default = "default_invalid_files")]
    pub invalid_files: String,
    #[serde(default = "default_splitted")]
    pub splitted: String,
    #[serde(default = "default_classified_prefix")]
    pub classified_prefix: String,
}

fn default_input() -> String {
    "input".to_string()
}

fn default_backup() -> String {
    "backup".to_string()
}

fn default_invalid_files() -> String {
    "invalid-files".to_string()
}

fn default_splitted() -> String {
    "splitted".to_string()
}

fn default_classified_prefix() -> String {
    "classified-".to_string()
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            backup: default_backup(),
            invalid_files: default_invalid_files(),
            splitted: default_splitted(),
            classified_prefix: default_classified_prefix(),
        }
    }
}

impl LocationsConfig {
    /// Location a page of the given type is moved to after classification.
    pub fn classified_for(&self, document_type: &str) -> String {
        let lowered = document_type.trim().to_lowercase();
        let mut slug = String::with_capacity(lowered.len());
        for c in lowered.chars() {
            let c = if c.is_ascii_alphanumeric() { c } else { '-' };
            if c == '-' && slug.ends_with('-') {
                continue;
            }
            slug.push(c);
        }
        // Location names are capped at 63 chars
        let max = 63usize.saturating_sub(self.classified_prefix.len());
        slug.truncate(max);
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            format!("{}unknown", self.classified_prefix)
        } else {
            format!("{}{}", self.classified_prefix, slug)
        }
    }

    pub fn is_classified(&self, location: &str) -> bool {
        location.len() > self.classified_prefix.len()
            && location.starts_with(&self.classified_prefix)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                key: "log_format".to_string(),
                reason: format!("expected 'text' or 'json', got '{}'", other),
            }),
        }
    }
}

fn require<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing {
            key: key.to_string(),
        }),
    }
}
