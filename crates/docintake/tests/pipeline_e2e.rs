//! End-to-end runs of the intake pipeline: upload, split, classify, OCR.
//!
//! Every test drives the real watcher and dispatcher over a filesystem blob
//! store; only the document-intelligence service is scripted.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lopdf::Document;
use serde_json::json;

use common::{classified_as, pdf_with_pages, read_result, ConfigBuilder, TestHarness};
use docintake::capability::ScriptedCapability;
use docintake::db::{ErrorStage, RecordFilter, Stage};
use docintake::error::{CapabilityError, ResponseDetail, SplitError};
use docintake::processor::{LopdfPageBuilder, PageBuilder, PageSplitter};

#[tokio::test]
async fn test_three_page_upload_runs_to_completion() {
    let config = ConfigBuilder::new()
        .ocr_model("invoice", "prebuilt-invoice")
        .build();
    let capability = ScriptedCapability::new()
        .classify_as(classified_as("Invoice", 0.87))
        .analyze_as(read_result(&["ACME Corp", "Total 12.00"]));
    let mut h = TestHarness::new(config, capability).await;

    h.upload("report.pdf", &pdf_with_pages(3)).await;
    h.run_until_idle().await;

    assert!(h.keys("input").await.is_empty());
    assert_eq!(h.keys("backup").await, vec!["report.pdf"]);
    assert!(h.keys("splitted").await.is_empty());
    assert_eq!(
        h.keys("classified-invoice").await,
        vec!["page-1_report.pdf", "page-2_report.pdf", "page-3_report.pdf"]
    );

    // Every page in the classified location is a one-page PDF
    for key in h.keys("classified-invoice").await {
        let bytes = std::fs::read(h.blob_path("classified-invoice", &key)).unwrap();
        let page = Document::load_mem(&bytes).unwrap();
        assert_eq!(page.get_pages().len(), 1, "{} should have one page", key);
    }

    let done = h
        .records(RecordFilter {
            stage: Some(Stage::OcrCompleted),
            ..Default::default()
        })
        .await;
    assert_eq!(done.len(), 3);
    for record in &done {
        let classification = record.classification.as_ref().unwrap();
        assert_eq!(classification.document_type, "Invoice");
        assert_eq!(classification.selected_ocr_model, "prebuilt-invoice");
        assert_eq!(
            record.ocr.as_ref().unwrap().extracted_text,
            "ACME Corp\nTotal 12.00"
        );
        assert_eq!(record.source_file_name, record.id);
    }

    let calls = h.capability.calls();
    assert_eq!(calls.iter().filter(|c| c.operation == "classify").count(), 3);
    assert!(calls
        .iter()
        .filter(|c| c.operation == "analyze")
        .all(|c| c.model_id == "prebuilt-invoice"));
}

#[tokio::test]
async fn test_restart_does_not_repeat_ocr() {
    let capability = ScriptedCapability::new()
        .classify_as(classified_as("invoice", 0.9))
        .analyze_as(read_result(&["Total 3.00"]));
    let mut h = TestHarness::new(ConfigBuilder::new().build(), capability).await;

    h.upload("pair.pdf", &pdf_with_pages(2)).await;
    h.run_until_idle().await;
    let analyzed = |h: &TestHarness| {
        h.capability
            .calls()
            .iter()
            .filter(|c| c.operation == "analyze")
            .count()
    };
    assert_eq!(analyzed(&h), 2);
    let before = h.record("page-1_pair.pdf").await.unwrap();

    // Both pages are still in the classified location and get delivered again
    h.restart();
    h.run_until_idle().await;

    assert_eq!(analyzed(&h), 2);
    let after = h.record("page-1_pair.pdf").await.unwrap();
    assert_eq!(after.stage, Stage::OcrCompleted);
    assert_eq!(
        after.ocr.unwrap().processed_at,
        before.ocr.unwrap().processed_at
    );
    assert!(h.errors("page-1_pair.pdf").await.is_empty());
}

#[tokio::test]
async fn test_records_are_queryable_by_document_type() {
    let config = ConfigBuilder::new().build();
    let capability = ScriptedCapability::new().classify_as(classified_as("Receipt", 0.5));
    let mut h = TestHarness::new(config, capability).await;

    h.upload("till.pdf", &pdf_with_pages(2)).await;
    h.run_until_idle().await;

    let receipts = h
        .records(RecordFilter {
            document_type: Some("receipt".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(receipts.len(), 2);
    assert_eq!(h.keys("classified-receipt").await.len(), 2);
}

#[tokio::test]
async fn test_non_pdf_upload_is_set_aside() {
    let mut h = TestHarness::new(ConfigBuilder::new().build(), ScriptedCapability::new()).await;

    h.upload("notes.txt", b"just some text").await;
    h.run_until_idle().await;

    assert_eq!(h.keys("invalid-files").await, vec!["notes.txt"]);
    assert!(h.keys("splitted").await.is_empty());
    assert!(h.keys("backup").await.is_empty());
    assert!(h.capability.calls().is_empty());
    assert!(h.errors("notes.txt").await.is_empty());
}

struct FailingPage(u32);

impl PageBuilder for FailingPage {
    fn build_page(&self, source: &Document, page_number: u32) -> Result<Document, SplitError> {
        if page_number == self.0 {
            return Err(SplitError::Page {
                page: page_number,
                reason: "simulated failure".to_string(),
            });
        }
        LopdfPageBuilder.build_page(source, page_number)
    }
}

#[tokio::test]
async fn test_failed_page_does_not_stop_the_others() {
    let capability = ScriptedCapability::new().classify_as(classified_as("letter", 0.9));
    let mut h = TestHarness::with_splitter(
        ConfigBuilder::new().build(),
        capability,
        PageSplitter::with_builder(FailingPage(2)),
    )
    .await;

    h.upload("scan.pdf", &pdf_with_pages(3)).await;
    h.run_until_idle().await;

    assert_eq!(
        h.keys("classified-letter").await,
        vec!["page-1_scan.pdf", "page-3_scan.pdf"]
    );
    assert!(h.keys("input").await.is_empty());
}

#[tokio::test]
async fn test_classification_failure_is_isolated_to_one_page() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let capability = ScriptedCapability::new().on_classify(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(CapabilityError::Response {
                operation: "classify".to_string(),
                detail: ResponseDetail {
                    status: 503,
                    body: "busy".to_string(),
                },
            });
        }
        Ok(classified_as("invoice", 0.8))
    });
    let mut h = TestHarness::new(ConfigBuilder::new().workers(1).build(), capability).await;

    h.upload("batch.pdf", &pdf_with_pages(3)).await;
    h.run_until_idle().await;

    let left = h.keys("splitted").await;
    assert_eq!(left.len(), 1);
    assert_eq!(h.keys("classified-invoice").await.len(), 2);

    let errors = h.errors(&left[0]).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, ErrorStage::Classification);
    assert!(errors[0].error_message.contains("503"));
}

#[tokio::test]
async fn test_page_dropped_into_classified_location_without_record() {
    let mut h = TestHarness::new(ConfigBuilder::new().build(), ScriptedCapability::new()).await;

    h.put("classified-invoice", "page-1_stray.pdf", &pdf_with_pages(1))
        .await;
    h.run_until_idle().await;

    let errors = h.errors("page-1_stray.pdf").await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, ErrorStage::Ocr);
    assert_eq!(errors[0].error_type, "NoClassificationData");
    assert!(h.record("page-1_stray.pdf").await.is_none());
    assert!(h.capability.calls().is_empty());
}

#[tokio::test]
async fn test_ocr_failure_marks_record_as_error() {
    let capability = ScriptedCapability::new()
        .classify_as(classified_as("invoice", 0.9))
        .on_analyze(|_, _| Ok(json!({ "pages": "not a list" })));
    let mut h = TestHarness::new(ConfigBuilder::new().build(), capability).await;

    h.upload("one.pdf", &pdf_with_pages(1)).await;
    h.run_until_idle().await;

    let record = h.record("page-1_one.pdf").await.unwrap();
    assert_eq!(record.stage, Stage::Error);
    assert!(record.classification.is_some());
    assert!(record.ocr.is_none());

    let errors = h.errors("page-1_one.pdf").await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, ErrorStage::Ocr);
}

#[tokio::test]
async fn test_missing_classifier_leaves_pages_in_place() {
    let config = ConfigBuilder::new().classifier(None).build();
    let mut h = TestHarness::new(config, ScriptedCapability::new()).await;

    h.upload("a.pdf", &pdf_with_pages(2)).await;
    h.run_until_idle().await;

    assert_eq!(
        h.keys("splitted").await,
        vec!["page-1_a.pdf", "page-2_a.pdf"]
    );
    let errors = h.errors("page-1_a.pdf").await;
    assert_eq!(errors[0].error_type, "ConfigError");
}
