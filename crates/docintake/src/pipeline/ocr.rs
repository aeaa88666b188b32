use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use crate::db::{ErrorStage, OcrData, Stage};

use super::context::StageContext;
use super::error::StageError;
use super::event::StageEvent;
use super::flatten::flatten_text;
use super::StageHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Skipped,
    /// The record already carries OCR output; the capability is not called again.
    AlreadyCompleted,
    Completed { characters: usize },
    Failed { reason: String },
}

/// Extracts text from classified pages with the OCR model chosen at
/// classification time.
pub struct OcrStage {
    ctx: StageContext,
}

impl OcrStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub async fn recognize(&self, event: StageEvent) -> OcrOutcome {
        let Some(key) = event.key().map(str::to_string) else {
            tracing::warn!(location = %event.location, "Classified page without a file name, ignoring");
            return OcrOutcome::Skipped;
        };

        let span = tracing::info_span!("stage.ocr", key = %key, location = %event.location);
        async move {
            let payload = match event.payload.into_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Cannot read payload for {}: {}", key, e);
                    return OcrOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            };

            match self.run(&event.location, &key, payload).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.ctx.record_failure(&key, ErrorStage::Ocr, &e).await;
                    OcrOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, location: &str, key: &str, payload: Vec<u8>) -> Result<OcrOutcome, StageError> {
        let record = self
            .ctx
            .records
            .get(key)
            .await?
            .ok_or_else(|| StageError::NoClassificationData(key.to_string()))?;
        if record.stage == Stage::OcrCompleted && record.ocr.is_some() {
            tracing::info!("{} already has OCR text, skipping", key);
            return Ok(OcrOutcome::AlreadyCompleted);
        }
        let model_id = record
            .classification
            .as_ref()
            .map(|c| c.selected_ocr_model.clone())
            .ok_or_else(|| StageError::NoClassificationData(key.to_string()))?;

        let document = match self.ctx.storage.download(location, key).await? {
            Some(bytes) => bytes,
            None => {
                tracing::debug!("{} not found in {}, using the trigger payload", key, location);
                payload
            }
        };

        tracing::info!("Running OCR on {} with {}", key, model_id);
        let raw = self.ctx.capability.analyze(&model_id, &document).await?;
        let text = flatten_text(&raw)?;
        let characters = text.chars().count();

        let mut updated = record;
        updated.stage = Stage::OcrCompleted;
        updated.ocr = Some(OcrData {
            extracted_text: text,
            raw_result: raw,
            processed_at: Utc::now(),
        });
        self.ctx.records.upsert(updated).await?;

        tracing::info!("OCR finished for {}: {} characters", key, characters);
        Ok(OcrOutcome::Completed { characters })
    }
}

#[async_trait]
impl StageHandler for OcrStage {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn handle(&self, event: StageEvent) {
        let outcome = self.recognize(event).await;
        tracing::debug!("ocr finished: {:?}", outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::capability::ScriptedCapability;
    use crate::db::{
        ClassificationData, PipelineRecord, RecordMetadata, RecordStore, SqliteRecordStore,
    };
    use crate::error::CapabilityError;
    use crate::pipeline::{PipelineConfig, TriggerPayload};
    use crate::processor::test_support::create_pdf;
    use crate::storage::{BlobStore, MemoryBlobStore, StorageRelocator, PDF_CONTENT_TYPE};

    const LOCATION: &str = "classified-invoice";

    struct Harness {
        store: MemoryBlobStore,
        records: Arc<SqliteRecordStore>,
        capability: Arc<ScriptedCapability>,
        stage: OcrStage,
    }

    async fn harness(capability: ScriptedCapability) -> Harness {
        let store = MemoryBlobStore::new();
        store.ensure_location(LOCATION).await.unwrap();
        let records = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let capability = Arc::new(capability);
        let ctx = StageContext::new(
            PipelineConfig::with_classifier("intake-classifier"),
            StorageRelocator::new(Arc::new(store.clone())),
            records.clone(),
            capability.clone(),
        );
        Harness {
            store,
            records,
            capability,
            stage: OcrStage::new(ctx),
        }
    }

    async fn classified(h: &Harness, key: &str) {
        let now = Utc::now();
        let mut record = PipelineRecord::new(
            key,
            key,
            RecordMetadata {
                original_size_bytes: 100,
                source: "splitted".to_string(),
                processed_at: now,
            },
        );
        record.stage = Stage::Classified;
        record.classification = Some(ClassificationData {
            document_type: "invoice".to_string(),
            confidence: 0.9,
            model_id: "intake-classifier".to_string(),
            selected_ocr_model: "prebuilt-invoice".to_string(),
            classified_at: now,
            raw_result: json!({}),
        });
        h.records.upsert(record).await.unwrap();
    }

    fn two_pages() -> serde_json::Value {
        json!({
            "pages": [
                { "lines": [{ "content": "ACME Corp" }, { "content": "Invoice 7" }] },
                { "lines": [{ "content": "Total 12.00" }] }
            ]
        })
    }

    #[tokio::test]
    async fn test_ocr_stores_text() {
        let h = harness(ScriptedCapability::new().analyze_as(two_pages())).await;
        classified(&h, "page-1_a.pdf").await;
        let bytes = create_pdf(1);
        h.store
            .put(LOCATION, "page-1_a.pdf", &bytes, PDF_CONTENT_TYPE)
            .await
            .unwrap();

        let outcome = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-1_a.pdf", bytes.clone()))
            .await;
        let expected = "ACME Corp\nInvoice 7\n\nTotal 12.00";
        assert_eq!(
            outcome,
            OcrOutcome::Completed {
                characters: expected.len()
            }
        );

        let record = h.records.get("page-1_a.pdf").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::OcrCompleted);
        assert_eq!(record.ocr.unwrap().extracted_text, expected);
        // Classification is untouched
        assert_eq!(record.classification.unwrap().selected_ocr_model, "prebuilt-invoice");

        let calls = h.capability.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "analyze");
        assert_eq!(calls[0].model_id, "prebuilt-invoice");
        assert_eq!(calls[0].document_len, bytes.len());
    }

    #[tokio::test]
    async fn test_redelivered_page_is_not_reprocessed() {
        let h = harness(ScriptedCapability::new().analyze_as(two_pages())).await;
        classified(&h, "page-1_b.pdf").await;
        let bytes = create_pdf(1);
        h.store
            .put(LOCATION, "page-1_b.pdf", &bytes, PDF_CONTENT_TYPE)
            .await
            .unwrap();

        let first = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-1_b.pdf", bytes.clone()))
            .await;
        assert!(matches!(first, OcrOutcome::Completed { .. }));
        let processed_at = h
            .records
            .get("page-1_b.pdf")
            .await
            .unwrap()
            .unwrap()
            .ocr
            .unwrap()
            .processed_at;

        let second = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-1_b.pdf", bytes))
            .await;
        assert_eq!(second, OcrOutcome::AlreadyCompleted);
        assert_eq!(h.capability.calls().len(), 1);

        let record = h.records.get("page-1_b.pdf").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::OcrCompleted);
        assert_eq!(record.ocr.unwrap().processed_at, processed_at);
        assert!(h.records.errors_for("page-1_b.pdf").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ocr_falls_back_to_payload() {
        let h = harness(ScriptedCapability::new().analyze_as(two_pages())).await;
        classified(&h, "page-2_a.pdf").await;

        let outcome = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-2_a.pdf", b"%PDF-payload".to_vec()))
            .await;
        assert!(matches!(outcome, OcrOutcome::Completed { .. }));
        assert_eq!(h.capability.calls()[0].document_len, b"%PDF-payload".len());
    }

    #[tokio::test]
    async fn test_ocr_without_record_fails() {
        let h = harness(ScriptedCapability::new()).await;

        let outcome = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-1_x.pdf", create_pdf(1)))
            .await;
        assert!(matches!(outcome, OcrOutcome::Failed { .. }));
        assert!(h.capability.calls().is_empty());

        let errors = h.records.errors_for("page-1_x.pdf").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, ErrorStage::Ocr);
        assert_eq!(errors[0].error_type, "NoClassificationData");
        assert!(errors[0].error_message.contains("No classification data found"));
    }

    #[tokio::test]
    async fn test_ocr_without_classification_fails() {
        let h = harness(ScriptedCapability::new()).await;
        let record = PipelineRecord::new(
            "page-1_y.pdf",
            "page-1_y.pdf",
            RecordMetadata {
                original_size_bytes: 1,
                source: "splitted".to_string(),
                processed_at: Utc::now(),
            },
        );
        h.records.upsert(record).await.unwrap();

        let outcome = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-1_y.pdf", create_pdf(1)))
            .await;
        assert!(matches!(outcome, OcrOutcome::Failed { .. }));

        let stored = h.records.get("page-1_y.pdf").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Error);
    }

    #[tokio::test]
    async fn test_ocr_capability_failure_marks_record() {
        let capability = ScriptedCapability::new().on_analyze(|_, _| {
            Err(CapabilityError::OperationFailed {
                operation: "analyze".to_string(),
                status: "failed".to_string(),
                detail: None,
            })
        });
        let h = harness(capability).await;
        classified(&h, "page-3_a.pdf").await;

        let outcome = h
            .stage
            .recognize(StageEvent::new(LOCATION, "page-3_a.pdf", create_pdf(1)))
            .await;
        assert!(matches!(outcome, OcrOutcome::Failed { .. }));

        let stored = h.records.get("page-3_a.pdf").await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::Error);
        assert!(stored.ocr.is_none());
        assert!(stored.classification.is_some());
        assert_eq!(h.records.errors_for("page-3_a.pdf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uncoercible_payload_is_dropped() {
        let h = harness(ScriptedCapability::new()).await;
        classified(&h, "page-4_a.pdf").await;

        let outcome = h
            .stage
            .recognize(StageEvent::new(
                LOCATION,
                "page-4_a.pdf",
                TriggerPayload::Json(json!({ "unexpected": true })),
            ))
            .await;
        assert!(matches!(outcome, OcrOutcome::Failed { .. }));
        assert!(h.capability.calls().is_empty());
        assert!(h.records.errors_for("page-4_a.pdf").await.unwrap().is_empty());
    }
}
