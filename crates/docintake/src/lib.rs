pub mod capability;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use capability::{DocumentIntelligence, DocumentIntelligenceClient, ScriptedCapability};
pub use config::{load_config, Config};
pub use db::{PipelineRecord, RecordStore, SqliteRecordStore, Stage};
pub use error::{
    CapabilityError, ConfigError, IntakeError, Result, SplitError, StorageError, WorkerError,
};
pub use pipeline::{
    ClassificationStage, IngestStage, OcrStage, PipelineConfig, StageContext, StageEvent,
    StageHandler, TriggerPayload,
};
pub use processor::PageSplitter;
pub use secrets::{resolve_secret, CredentialSource, SecretError};
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore, StorageRelocator};
pub use worker::{Dispatcher, LocationMatch, LocationWatcher};
