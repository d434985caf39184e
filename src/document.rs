//! Conversion from typed attribute images into plain JSON documents.

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::change::{Image, TypedValue};
use crate::error::{ReplicationError, Result};

/// A plain document as written to the target store. Always carries an `id`.
pub type Document = JsonMap<String, JsonValue>;

/// Convert a new image into a fresh document. The image is left untouched.
pub fn to_document(image: &Image) -> Result<Document> {
    image
        .iter()
        .map(|(name, value)| Ok((name.clone(), to_json(name, value)?)))
        .collect()
}

/// The document's `id`, which doubles as its partition key
pub fn document_id(document: &Document) -> Result<&str> {
    document
        .get("id")
        .and_then(JsonValue::as_str)
        .ok_or(ReplicationError::MissingId)
}

fn to_json(attribute: &str, value: &TypedValue) -> Result<JsonValue> {
    match value {
        TypedValue::String(string) => Ok(JsonValue::String(string.clone())),
        TypedValue::Number(number) => parse_number(attribute, number),
        TypedValue::Bool(boolean) => Ok(JsonValue::Bool(*boolean)),
        TypedValue::Null(_) => Ok(JsonValue::Null),
        TypedValue::StringSet(strings) => Ok(JsonValue::Array(
            strings.iter().cloned().map(JsonValue::String).collect(),
        )),
        TypedValue::NumberSet(numbers) => numbers
            .iter()
            .map(|number| parse_number(attribute, number))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        TypedValue::List(values) => values
            .iter()
            .map(|value| to_json(attribute, value))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        TypedValue::Map(entries) => entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), to_json(&format!("{attribute}.{key}"), value)?)))
            .collect::<Result<JsonMap<_, _>>>()
            .map(JsonValue::Object),
        TypedValue::Binary(_) | TypedValue::BinarySet(_) => {
            Err(ReplicationError::UnsupportedAttributeType {
                attribute: attribute.to_string(),
                tag: value.tag().to_string(),
            })
        }
    }
}

// Numbers are always carried as floats, so "30" becomes 30.0
fn parse_number(attribute: &str, number: &str) -> Result<JsonValue> {
    number
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(JsonValue::Number)
        .ok_or_else(|| ReplicationError::InvalidNumber {
            attribute: attribute.to_string(),
            value: number.to_string(),
        })
}
