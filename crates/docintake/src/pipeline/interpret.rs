//! Reading a document type and confidence out of a classifier result.
//!
//! Classifier payloads come in several shapes. They are tried in order:
//!
//! 1. `documents[0].docType` / `documents[0].confidence`
//! 2. `classification.docType` / `classification.confidence`, whenever
//!    `classification` is truthy
//! 3. top-level `docType` / `confidence`
//! 4. the first `docType` and `confidence` found anywhere in the tree
//!
//! Missing values fall back to `"unknown"` and `0`.

use serde_json::Value;

pub const UNKNOWN_DOCUMENT_TYPE: &str = "unknown";

const DOC_TYPE_FIELD: &str = "docType";
const CONFIDENCE_FIELD: &str = "confidence";

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub document_type: String,
    /// Clamped to `[0, 1]`.
    pub confidence: f64,
}

impl Classification {
    fn from_fields(doc_type: Option<&Value>, confidence: Option<&Value>) -> Self {
        let document_type = doc_type
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_DOCUMENT_TYPE)
            .to_string();
        Self {
            document_type,
            confidence: clamp_confidence(confidence.and_then(Value::as_f64)),
        }
    }
}

/// Picks the node a shape reads from, if the result has that shape.
type ShapeMatch = fn(&Value) -> Option<&Value>;
/// Reads the classification out of the matched node.
type ShapeExtract = fn(&Value) -> Classification;

/// Result shapes in priority order; the first match wins.
///
/// A truthy `classification` of any JSON type selects the second shape. A
/// non-object there yields `"unknown"` rather than falling through to the
/// later shapes.
const SHAPES: &[(ShapeMatch, ShapeExtract)] = &[
    (first_document, fields_of),
    (classification_field, fields_of),
    (top_level_doc_type, fields_of),
    (whole_result, deep_search),
];

pub fn interpret_classification(result: &Value) -> Classification {
    SHAPES
        .iter()
        .find_map(|(select, extract)| select(result).map(extract))
        .unwrap_or_else(|| Classification::from_fields(None, None))
}

fn first_document(result: &Value) -> Option<&Value> {
    result
        .get("documents")
        .and_then(Value::as_array)
        .and_then(|docs| docs.first())
}

fn classification_field(result: &Value) -> Option<&Value> {
    result.get("classification").filter(|v| is_truthy(v))
}

fn top_level_doc_type(result: &Value) -> Option<&Value> {
    result
        .get(DOC_TYPE_FIELD)
        .filter(|v| is_truthy(v))
        .map(|_| result)
}

fn whole_result(result: &Value) -> Option<&Value> {
    Some(result)
}

fn fields_of(node: &Value) -> Classification {
    Classification::from_fields(node.get(DOC_TYPE_FIELD), node.get(CONFIDENCE_FIELD))
}

fn deep_search(result: &Value) -> Classification {
    Classification::from_fields(
        find_property(result, DOC_TYPE_FIELD, Value::is_string),
        find_property(result, CONFIDENCE_FIELD, Value::is_number),
    )
}

/// Depth-first search for the first `name` field whose value passes `accept`.
fn find_property<'a>(value: &'a Value, name: &str, accept: fn(&Value) -> bool) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(name).filter(|v| accept(v)) {
                return Some(found);
            }
            map.values().find_map(|v| find_property(v, name, accept))
        }
        Value::Array(items) => items.iter().find_map(|v| find_property(v, name, accept)),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn clamp_confidence(value: Option<f64>) -> f64 {
    match value {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    }
}
