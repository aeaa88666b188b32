//! Offline [`DocumentIntelligence`] that answers from closures.
//!
//! Used by tests and by hosts that want to run the pipeline without a
//! remote service.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::DocumentIntelligence;
use crate::error::CapabilityError;

type Responder = Box<dyn Fn(&str, &[u8]) -> Result<Value, CapabilityError> + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCall {
    pub operation: &'static str,
    pub model_id: String,
    pub document_len: usize,
}

pub struct ScriptedCapability {
    classify: Responder,
    analyze: Responder,
    calls: Mutex<Vec<CapabilityCall>>,
}

impl Default for ScriptedCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCapability {
    /// Classifies nothing and reads no text until told otherwise.
    pub fn new() -> Self {
        Self {
            classify: Box::new(|_, _| Ok(json!({ "documents": [] }))),
            analyze: Box::new(|_, _| Ok(json!({ "pages": [] }))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_classify<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        self.classify = Box::new(responder);
        self
    }

    pub fn on_analyze<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        self.analyze = Box::new(responder);
        self
    }

    /// Every classification returns `result`.
    pub fn classify_as(self, result: Value) -> Self {
        self.on_classify(move |_, _| Ok(result.clone()))
    }

    /// Every analysis returns `result`.
    pub fn analyze_as(self, result: Value) -> Self {
        self.on_analyze(move |_, _| Ok(result.clone()))
    }

    pub fn calls(&self) -> Vec<CapabilityCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, operation: &'static str, model_id: &str, document: &[u8]) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(CapabilityCall {
                operation,
                model_id: model_id.to_string(),
                document_len: document.len(),
            });
        }
    }
}

#[async_trait]
impl DocumentIntelligence for ScriptedCapability {
    async fn classify(&self, model_id: &str, document: &[u8]) -> Result<Value, CapabilityError> {
        self.record("classify", model_id, document);
        (self.classify)(model_id, document)
    }

    async fn analyze(&self, model_id: &str, document: &[u8]) -> Result<Value, CapabilityError> {
        self.record("analyze", model_id, document);
        (self.analyze)(model_id, document)
    }
}
