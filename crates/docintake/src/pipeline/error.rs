use thiserror::Error;

use crate::error::{
    CapabilityError, ConfigError, ResponseDetail, SplitError, StorageError,
};

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Unusable trigger payload: {0}")]
    Payload(String),

    #[error("No classification data found for {0}")]
    NoClassificationData(String),

    #[error("Split failed: {0}")]
    Split(#[from] SplitError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Capability call failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Record store failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Stage is not configured: {0}")]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StageError {
    /// Short error category stored with error records.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Payload(_) => "PayloadError",
            StageError::NoClassificationData(_) => "NoClassificationData",
            StageError::Split(e) if e.is_malformed() => "MalformedDocument",
            StageError::Split(_) => "SplitError",
            StageError::Storage(_) => "StorageError",
            StageError::Capability(_) => "CapabilityError",
            StageError::Database(_) => "DatabaseError",
            StageError::Config(_) => "ConfigError",
            StageError::Task(_) => "TaskError",
        }
    }

    pub fn response_detail(&self) -> Option<&ResponseDetail> {
        match self {
            StageError::Capability(e) => e.response_detail(),
            _ => None,
        }
    }
}
