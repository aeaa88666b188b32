use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use crate::db::{ClassificationData, ErrorStage, PipelineRecord, RecordMetadata, Stage};
use crate::storage::Relocation;

use super::context::StageContext;
use super::error::StageError;
use super::event::StageEvent;
use super::interpret::interpret_classification;
use super::StageHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    Skipped,
    /// The page was no longer in its trigger location.
    Missing,
    Classified {
        document_type: String,
        confidence: f64,
        location: String,
        relocation: Relocation,
    },
    Failed {
        reason: String,
    },
}

/// Classifies split pages and routes each to its per-type location.
pub struct ClassificationStage {
    ctx: StageContext,
}

impl ClassificationStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub async fn classify(&self, event: StageEvent) -> ClassifyOutcome {
        let Some(key) = event.key().map(str::to_string) else {
            tracing::warn!(location = %event.location, "Page event without a file name, ignoring");
            return ClassifyOutcome::Skipped;
        };

        let span = tracing::info_span!("stage.classify", key = %key);
        async move {
            match self.run(&event.location, &key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.ctx
                        .record_failure(&key, ErrorStage::Classification, &e)
                        .await;
                    ClassifyOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, source: &str, key: &str) -> Result<ClassifyOutcome, StageError> {
        let Some(bytes) = self.ctx.storage.download(source, key).await? else {
            tracing::info!("{} is no longer in {}, nothing to classify", key, source);
            return Ok(ClassifyOutcome::Missing);
        };

        let config = &self.ctx.config;
        let model_id = config.classification.require_model_id()?;

        let raw = self.ctx.capability.classify(model_id, &bytes).await?;
        let interpreted = interpret_classification(&raw);
        let selected_ocr_model = config.ocr.model_for(&interpreted.document_type).to_string();
        tracing::info!(
            "{} classified as {} ({:.2}), OCR model {}",
            key,
            interpreted.document_type,
            interpreted.confidence,
            selected_ocr_model
        );

        let now = Utc::now();
        let mut record = PipelineRecord::new(
            key,
            key,
            RecordMetadata {
                original_size_bytes: bytes.len() as u64,
                source: source.to_string(),
                processed_at: now,
            },
        );
        record.stage = Stage::Classified;
        record.classification = Some(ClassificationData {
            document_type: interpreted.document_type.clone(),
            confidence: interpreted.confidence,
            model_id: model_id.to_string(),
            selected_ocr_model,
            classified_at: now,
            raw_result: raw,
        });

        let stored = self.ctx.records.upsert(record).await?;

        // A page classified earlier keeps its first classification.
        let (document_type, confidence) = match stored.classification {
            Some(c) => (c.document_type, c.confidence),
            None => (interpreted.document_type, interpreted.confidence),
        };

        let destination = config.locations.classified_for(&document_type);
        let relocation = self.ctx.storage.relocate(source, &destination, key).await?;

        Ok(ClassifyOutcome::Classified {
            document_type,
            confidence,
            location: destination,
            relocation,
        })
    }
}

#[async_trait]
impl StageHandler for ClassificationStage {
    fn name(&self) -> &'static str {
        "classification"
    }

    async fn handle(&self, event: StageEvent) {
        let outcome = self.classify(event).await;
        tracing::debug!("classification finished: {:?}", outcome);
    }
}
