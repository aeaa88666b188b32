use std::error::Error as _;
use std::sync::Arc;

use crate::capability::DocumentIntelligence;
use crate::db::{ErrorStage, NewErrorRecord, RecordStore};
use crate::processor::PageSplitter;
use crate::storage::StorageRelocator;

use super::config::PipelineConfig;
use super::error::StageError;

/// Everything a stage needs to do its work. Cheap to clone.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub storage: StorageRelocator,
    pub records: Arc<dyn RecordStore>,
    pub capability: Arc<dyn DocumentIntelligence>,
    pub splitter: Arc<PageSplitter>,
}

impl StageContext {
    pub fn new(
        config: PipelineConfig,
        storage: StorageRelocator,
        records: Arc<dyn RecordStore>,
        capability: Arc<dyn DocumentIntelligence>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            records,
            capability,
            splitter: Arc::new(PageSplitter::new()),
        }
    }

    pub fn with_splitter(mut self, splitter: PageSplitter) -> Self {
        self.splitter = Arc::new(splitter);
        self
    }

    /// Logs a stage failure, appends it to the error log and flags the
    /// document's record. Never fails: a broken record store is only logged.
    pub async fn record_failure(&self, document_id: &str, stage: ErrorStage, error: &StageError) {
        let message = error_chain(error);
        tracing::error!(
            document_id,
            stage = stage.as_str(),
            error_type = error.kind(),
            "{}",
            message
        );
        if let Some(detail) = error.response_detail() {
            tracing::error!(
                document_id,
                status = detail.status,
                body = %detail.body,
                "Remote service rejected the request"
            );
        }

        let entry = NewErrorRecord::new(document_id, stage, error.kind(), message);
        if let Err(e) = self.records.append_error(entry).await {
            tracing::warn!(document_id, "Failed to write error record: {}", e);
        }

        match self.records.mark_error(document_id).await {
            Ok(true) => tracing::debug!(document_id, "Record flagged as error"),
            Ok(false) => {}
            Err(e) => tracing::warn!(document_id, "Failed to flag record: {}", e),
        }
    }
}

/// Renders an error with its sources, skipping causes the message already
/// spells out.
pub fn error_chain(error: &StageError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
