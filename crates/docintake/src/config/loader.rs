use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::CredentialSource;
use crate::storage::validate_location;

pub const ENV_CAPABILITY_ENDPOINT: &str = "DOCINTAKE_CAPABILITY_ENDPOINT";
pub const ENV_CAPABILITY_KEY: &str = "DOCINTAKE_CAPABILITY_KEY";
pub const ENV_STORAGE_ROOT: &str = "DOCINTAKE_STORAGE_ROOT";
pub const ENV_DATABASE_PATH: &str = "DOCINTAKE_DATABASE_PATH";
pub const ENV_CLASSIFIER_MODEL: &str = "DOCINTAKE_CLASSIFIER_MODEL";
pub const ENV_DEFAULT_OCR_MODEL: &str = "DOCINTAKE_DEFAULT_OCR_MODEL";
pub const ENV_WORKERS: &str = "DOCINTAKE_WORKERS";
pub const ENV_LOG_FORMAT: &str = "DOCINTAKE_LOG_FORMAT";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Builds a config from defaults plus the process environment.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

impl Config {
    /// Defaults plus `DOCINTAKE_*` environment overrides, validated.
    pub fn from_env() -> Result<Config, ConfigError> {
        load_config_from_env()
    }
}

/// Overlays environment values onto `config`. `lookup` abstracts the
/// environment so callers and tests can supply their own source.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(endpoint) = get(ENV_CAPABILITY_ENDPOINT) {
        config.capability.endpoint = Some(endpoint.trim_end_matches('/').to_string());
    }
    // Only the variable name is kept; the value is read when the client is built.
    if get(ENV_CAPABILITY_KEY).is_some() {
        config.capability.key = CredentialSource::from_env_var(ENV_CAPABILITY_KEY);
    }
    if let Some(root) = get(ENV_STORAGE_ROOT) {
        config.storage.root = root;
    }
    if let Some(path) = get(ENV_DATABASE_PATH) {
        config.records.path = path;
    }
    if let Some(model) = get(ENV_CLASSIFIER_MODEL) {
        config.classification.model_id = Some(model);
    }
    if let Some(model) = get(ENV_DEFAULT_OCR_MODEL) {
        config.ocr.default_model = model;
    }
    if let Some(workers) = get(ENV_WORKERS) {
        config.worker_count = workers
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: ENV_WORKERS.to_string(),
                reason: format!("{}", e),
            })?;
    }
    if let Some(format) = get(ENV_LOG_FORMAT) {
        config.log_format = format.parse()?;
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be > 0".to_string(),
        });
    }

    if config.capability.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "capability.poll_interval_ms must be > 0".to_string(),
        });
    }

    let locations = &config.locations;
    for (role, name) in [
        ("input", &locations.input),
        ("backup", &locations.backup),
        ("invalid_files", &locations.invalid_files),
        ("splitted", &locations.splitted),
    ] {
        validate_location(name).map_err(|_| ConfigError::InvalidValue {
            key: format!("locations.{}", role),
            reason: format!("'{}' is not a valid location name", name),
        })?;
    }

    // The prefix alone is not a location, so validate a representative name.
    validate_location(&locations.classified_for("x")).map_err(|_| {
        ConfigError::InvalidValue {
            key: "locations.classified_prefix".to_string(),
            reason: format!(
                "'{}' does not produce valid location names",
                locations.classified_prefix
            ),
        }
    })?;

    let mut seen = std::collections::HashSet::new();
    for name in [
        &locations.input,
        &locations.backup,
        &locations.invalid_files,
        &locations.splitted,
    ] {
        if !seen.insert(name) || locations.is_classified(name) {
            return Err(ConfigError::Validation {
                message: format!("Location '{}' is used for more than one role", name),
            });
        }
    }

    Ok(())
}
