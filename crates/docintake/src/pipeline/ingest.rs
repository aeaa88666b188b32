use std::io::Write;

use async_trait::async_trait;
use tracing::Instrument;

use crate::db::ErrorStage;
use crate::error::SplitError;
use crate::processor::{is_pdf, PageArtifact};

use super::context::StageContext;
use super::error::StageError;
use super::event::StageEvent;
use super::StageHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The trigger carried no file name.
    Skipped,
    /// Not a PDF; copied to the invalid-files location.
    Rejected,
    Split { pages: usize, source_deleted: bool },
    Failed { reason: String },
}

/// Validates uploads, backs them up and splits them into single-page PDFs.
pub struct IngestStage {
    ctx: StageContext,
}

impl IngestStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub async fn ingest(&self, event: StageEvent) -> IngestOutcome {
        let Some(key) = event.key().map(str::to_string) else {
            tracing::warn!(location = %event.location, "Upload without a file name, ignoring");
            return IngestOutcome::Skipped;
        };

        let span = tracing::info_span!("stage.ingest", key = %key);
        self.run(&event.location, &key, event.payload)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        source: &str,
        key: &str,
        payload: super::event::TriggerPayload,
    ) -> IngestOutcome {
        let locations = &self.ctx.config.locations;
        let storage = &self.ctx.storage;

        let bytes = match payload.into_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot read upload {}: {}", key, e);
                return IngestOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        tracing::info!("Received {} ({} bytes)", key, bytes.len());

        if !is_pdf(&bytes) {
            tracing::warn!("{} is not a PDF, moving to {}", key, locations.invalid_files);
            if let Err(e) = storage.upload(&locations.invalid_files, key, &bytes).await {
                tracing::error!("Failed to store invalid upload {}: {}", key, e);
            }
            return IngestOutcome::Rejected;
        }

        match storage.upload(&locations.backup, key, &bytes).await {
            Ok(()) => tracing::debug!("Backed up {} to {}", key, locations.backup),
            Err(e) => tracing::warn!("Backup of {} failed, continuing: {}", key, e),
        }

        let pages = match self.split(key, bytes).await {
            Ok(pages) => pages,
            Err(e) => return self.fail(key, e).await,
        };
        tracing::info!("Split {} into {} page(s)", key, pages.len());

        for page in &pages {
            if let Err(e) = storage.upload(&locations.splitted, &page.file_name, &page.bytes).await {
                // Pages already uploaded stay; the source is kept for a retry.
                return self.fail(key, StageError::from(e)).await;
            }
            tracing::debug!("Uploaded {} to {}", page.file_name, locations.splitted);
        }

        let source_deleted = match storage.delete(source, key).await {
            Ok(true) => {
                tracing::info!("Removed {} from {}", key, source);
                true
            }
            Ok(false) => {
                tracing::info!("{} was already gone from {}", key, source);
                false
            }
            Err(e) => {
                tracing::warn!("Failed to remove {} from {}: {}", key, source, e);
                false
            }
        };

        IngestOutcome::Split {
            pages: pages.len(),
            source_deleted,
        }
    }

    /// Splits through a scratch file on the blocking pool. The scratch file
    /// is removed when the task ends, whatever the outcome.
    async fn split(&self, key: &str, bytes: Vec<u8>) -> Result<Vec<PageArtifact>, StageError> {
        let splitter = self.ctx.splitter.clone();
        let name = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<PageArtifact>, StageError> {
            let mut scratch = tempfile::Builder::new()
                .prefix("docintake-upload-")
                .suffix(".pdf")
                .tempfile()
                .map_err(SplitError::Scratch)?;
            scratch
                .write_all(&bytes)
                .and_then(|_| scratch.flush())
                .map_err(SplitError::Scratch)?;
            Ok(splitter.split_file(scratch.path(), &name)?)
        })
        .await
        .map_err(|e| StageError::Task(e.to_string()))?
    }

    async fn fail(&self, key: &str, error: StageError) -> IngestOutcome {
        self.ctx
            .record_failure(key, ErrorStage::Preprocessing, &error)
            .await;
        IngestOutcome::Failed {
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl StageHandler for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    async fn handle(&self, event: StageEvent) {
        let outcome = self.ingest(event).await;
        tracing::debug!("ingest finished: {:?}", outcome);
    }
}
