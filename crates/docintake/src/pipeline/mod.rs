pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod flatten;
pub mod ingest;
pub mod interpret;
pub mod ocr;

pub use classify::{ClassificationStage, ClassifyOutcome};
pub use config::PipelineConfig;
pub use context::{error_chain, StageContext};
pub use error::StageError;
pub use event::{StageEvent, TriggerPayload};
pub use flatten::flatten_text;
pub use ingest::{IngestOutcome, IngestStage};
pub use interpret::{interpret_classification, Classification, UNKNOWN_DOCUMENT_TYPE};
pub use ocr::{OcrOutcome, OcrStage};

use async_trait::async_trait;

/// A stage triggered by objects appearing in a storage location.
///
/// Handlers own their error reporting: failures end up in the logs and the
/// error log, never in the caller.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: StageEvent);
}
