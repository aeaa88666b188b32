//! Builders for test inputs.

#![allow(dead_code)]

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};

use docintake::config::{ClassificationConfig, Config, OcrConfig};

/// Builds a PDF with one `Page n` text line per page.
pub fn pdf_with_pages(page_count: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=page_count {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {}", n))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("Failed to encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("Failed to serialize PDF");
    buffer
}

/// Builder for pipeline configs.
pub struct ConfigBuilder {
    classifier: Option<String>,
    default_ocr_model: String,
    ocr_models: BTreeMap<String, String>,
    worker_count: usize,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            classifier: Some("intake-classifier".to_string()),
            default_ocr_model: "prebuilt-read".to_string(),
            ocr_models: BTreeMap::new(),
            worker_count: 2,
        }
    }

    pub fn classifier(mut self, model_id: Option<&str>) -> Self {
        self.classifier = model_id.map(str::to_string);
        self
    }

    pub fn ocr_model(mut self, document_type: &str, model_id: &str) -> Self {
        self.ocr_models
            .insert(document_type.to_string(), model_id.to_string());
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn build(self) -> Config {
        Config {
            classification: ClassificationConfig {
                model_id: self.classifier,
            },
            ocr: OcrConfig {
                default_model: self.default_ocr_model,
                models: self.ocr_models,
            },
            worker_count: self.worker_count,
            ..Config::default()
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifier result in the `documents[]` shape.
pub fn classified_as(doc_type: &str, confidence: f64) -> Value {
    json!({
        "modelId": "intake-classifier",
        "documents": [{ "docType": doc_type, "confidence": confidence }]
    })
}

/// Read result with the given lines on a single page.
pub fn read_result(lines: &[&str]) -> Value {
    let lines: Vec<Value> = lines.iter().map(|l| json!({ "content": l })).collect();
    json!({ "pages": [{ "pageNumber": 1, "lines": lines }] })
}
