use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Stage error: {0}")]
    Stage(#[from] crate::pipeline::StageError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Missing required configuration value '{key}'")]
    Missing { key: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Raised when the input is not a usable PDF container.
#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Malformed document '{name}': {reason}")]
    Malformed { name: String, reason: String },

    #[error("Failed to build page {page}: {reason}")]
    Page { page: u32, reason: String },

    #[error("Scratch area failure: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SplitError {
    pub fn malformed(name: &str, reason: impl Into<String>) -> Self {
        SplitError::Malformed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, SplitError::Malformed { .. })
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid location name '{0}'")]
    InvalidLocation(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Failed to create location '{location}': {source}")]
    CreateLocation {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{location}/{key}': {source}")]
    WriteObject {
        location: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{location}/{key}': {source}")]
    ReadObject {
        location: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete '{location}/{key}': {source}")]
    DeleteObject {
        location: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list location '{location}': {source}")]
    ListLocation {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// HTTP status and body captured from a failed capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDetail {
    pub status: u16,
    pub body: String,
}

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("{operation} request failed: {message}")]
    Request { operation: String, message: String },

    #[error("{operation} rejected with HTTP {}: {}", .detail.status, .detail.body)]
    Response {
        operation: String,
        detail: ResponseDetail,
    },

    #[error("{operation} response did not include an Operation-Location header")]
    MissingOperationLocation { operation: String },

    #[error("{operation} finished with status '{status}'")]
    OperationFailed {
        operation: String,
        status: String,
        detail: Option<ResponseDetail>,
    },

    #[error("Unexpected {operation} result: {message}")]
    InvalidResult { operation: String, message: String },
}

impl CapabilityError {
    /// Transport response attached to the failure, if any.
    pub fn response_detail(&self) -> Option<&ResponseDetail> {
        match self {
            CapabilityError::Response { detail, .. } => Some(detail),
            CapabilityError::OperationFailed { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("No handler registered for location '{0}'")]
    NoHandler(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Scan of location '{location}' failed: {source}")]
    ScanFailed {
        location: String,
        #[source]
        source: StorageError,
    },

    #[error("Handler task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
