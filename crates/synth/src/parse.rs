use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to parse JSON response: {source}\nContent: {content}")]
    InvalidJson {
        source: serde_json::Error,
        content: String,
    },
    #[error("Expected JSON array, got: {0}")]
    NotAnArray(&'static str),
}

/// Parses the assistant's reply into the list of generated row objects.
/// Markdown code fences around the array are tolerated.
pub fn extract_rows(content: &str) -> Result<Vec<Value>, ParseError> {
    let mut content = content.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    let content = content.trim();

    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(rows)) => Ok(rows),
        Ok(other) => Err(ParseError::NotAnArray(json_kind(&other))),
        Err(source) => Err(ParseError::InvalidJson {
            source,
            content: content.to_string(),
        }),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
