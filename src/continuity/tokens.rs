//! Rough token estimate for the continuity document

use super::ContinuityDocument;
use serde::Serialize;
use serde_json::Value;

/// Approximate characters per token
const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a document: the character length of every
/// top-level field's string form, divided by four.
///
/// Strings count their own characters, empty containers and nulls count
/// zero, anything else counts its compact JSON length. `estimated_tokens`
/// is not counted.
pub fn estimate_tokens(document: &ContinuityDocument) -> u64 {
    let mut chars = document.summary.chars().count();
    chars += serialized_len(&document.entries);
    chars += serialized_len(&document.participants);
    chars += document.extra.values().map(value_len).sum::<usize>();

    (chars / APPROX_CHARS_PER_TOKEN) as u64
}

fn serialized_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_value(value).map(|v| value_len(&v)).unwrap_or(0)
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) if items.is_empty() => 0,
        Value::Object(map) if map.is_empty() => 0,
        other => other.to_string().chars().count(),
    }
}
