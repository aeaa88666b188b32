//! Records persisted by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing stage of a [`PipelineRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Pending,
    Classified,
    OcrCompleted,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Classified => "classified",
            Stage::OcrCompleted => "ocr-completed",
            Stage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Stage::Pending),
            "classified" => Some(Stage::Classified),
            "ocr-completed" => Some(Stage::OcrCompleted),
            "error" => Some(Stage::Error),
            _ => None,
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Stage::Pending => Some(0),
            Stage::Classified => Some(1),
            Stage::OcrCompleted => Some(2),
            Stage::Error => None,
        }
    }

    /// Stage to keep when `incoming` is written over `stored`.
    ///
    /// Progress never goes backwards. `Error` can be entered from anywhere
    /// and left by any later successful stage, but not back to `Pending`.
    pub fn merge(stored: Stage, incoming: Stage) -> Stage {
        match (stored.rank(), incoming.rank()) {
            (_, None) => Stage::Error,
            (None, Some(0)) => Stage::Error,
            (None, Some(_)) => incoming,
            (Some(a), Some(b)) if b >= a => incoming,
            (Some(_), Some(_)) => stored,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationData {
    pub document_type: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub model_id: String,
    pub selected_ocr_model: String,
    pub classified_at: DateTime<Utc>,
    pub raw_result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrData {
    pub extracted_text: String,
    pub raw_result: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub original_size_bytes: u64,
    /// Location the document was read from.
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

/// One document instance travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: String,
    pub source_file_name: String,
    pub stage: Stage,
    pub classification: Option<ClassificationData>,
    pub ocr: Option<OcrData>,
    pub metadata: RecordMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    pub fn new(id: impl Into<String>, source_file_name: impl Into<String>, metadata: RecordMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_file_name: source_file_name.into(),
            stage: Stage::Pending,
            classification: None,
            ocr: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Combines an incoming write with the stored record.
    ///
    /// Classification is write-once; everything else is last-write-wins,
    /// with the stage going through [`Stage::merge`].
    pub fn merged_onto(self, stored: &PipelineRecord) -> PipelineRecord {
        PipelineRecord {
            id: stored.id.clone(),
            source_file_name: self.source_file_name,
            stage: Stage::merge(stored.stage, self.stage),
            classification: stored.classification.clone().or(self.classification),
            ocr: self.ocr.or_else(|| stored.ocr.clone()),
            metadata: self.metadata,
            created_at: stored.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Stage an error record is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Preprocessing,
    Classification,
    Ocr,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Preprocessing => "preprocessing",
            ErrorStage::Classification => "classification",
            ErrorStage::Ocr => "ocr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preprocessing" => Some(ErrorStage::Preprocessing),
            "classification" => Some(ErrorStage::Classification),
            "ocr" => Some(ErrorStage::Ocr),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error entry before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewErrorRecord {
    pub document_id: String,
    pub error_message: String,
    pub error_type: String,
    pub stage: ErrorStage,
    pub timestamp: DateTime<Utc>,
}

impl NewErrorRecord {
    pub fn new(
        document_id: impl Into<String>,
        stage: ErrorStage,
        error_type: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            error_message: error_message.into(),
            error_type: error_type.into(),
            stage,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingErrorRecord {
    pub id: i64,
    pub document_id: String,
    pub error_message: String,
    pub error_type: String,
    pub stage: ErrorStage,
    pub timestamp: DateTime<Utc>,
}
