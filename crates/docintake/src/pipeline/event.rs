use serde_json::Value;

use super::error::StageError;

/// Raw trigger payload as handed over by the delivery mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerPayload {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl TriggerPayload {
    /// Coerces the payload to bytes.
    ///
    /// Accepts raw bytes, UTF-8 text, a JSON string, a JSON array of byte
    /// values, or a serialized buffer object `{"type": "Buffer", "data": [...]}`.
    pub fn into_bytes(self) -> Result<Vec<u8>, StageError> {
        match self {
            TriggerPayload::Bytes(bytes) => Ok(bytes),
            TriggerPayload::Text(text) => Ok(text.into_bytes()),
            TriggerPayload::Json(value) => json_to_bytes(&value),
        }
    }
}

impl From<Vec<u8>> for TriggerPayload {
    fn from(bytes: Vec<u8>) -> Self {
        TriggerPayload::Bytes(bytes)
    }
}

fn json_to_bytes(value: &Value) -> Result<Vec<u8>, StageError> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        StageError::Payload(format!("element {} is not a byte value: {}", i, item))
                    })
            })
            .collect(),
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("Buffer") => {
            match map.get("data") {
                Some(data @ Value::Array(_)) => json_to_bytes(data),
                _ => Err(StageError::Payload(
                    "buffer object without a data array".to_string(),
                )),
            }
        }
        other => Err(StageError::Payload(format!(
            "cannot convert {} to bytes",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// An object appeared in a trigger location.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub location: String,
    pub key: String,
    pub payload: TriggerPayload,
}

impl StageEvent {
    pub fn new(location: impl Into<String>, key: impl Into<String>, payload: impl Into<TriggerPayload>) -> Self {
        Self {
            location: location.into(),
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// The trigger key, or `None` when the delivery carried no usable name.
    ///
    /// The key is returned exactly as stored; surrounding whitespace is part
    /// of the object name.
    pub fn key(&self) -> Option<&str> {
        (!self.key.trim().is_empty()).then_some(self.key.as_str())
    }
}
