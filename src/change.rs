use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::{ReplicationError, Result};

/// Attribute name to typed value, as found in a stream record's new image
pub type Image = HashMap<String, TypedValue>;

/// One batch of change-log entries delivered by the table's change stream
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChangeBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<ChangeEvent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChangeEvent {
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "eventName")]
    pub event_name: EventName,
    #[serde(default)]
    pub dynamodb: StreamRecord,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecord {
    /// Kept raw so a malformed attribute fails only its own record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

/// A value tagged with its type. Exactly one tag is present per value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum TypedValue {
    #[serde(rename = "S")]
    String(String),
    /// Numbers travel as decimal strings
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    /// Base64 encoded bytes
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
    #[serde(rename = "L")]
    List(Vec<TypedValue>),
    #[serde(rename = "M")]
    Map(HashMap<String, TypedValue>),
}

const TAGS: [&str; 10] = ["S", "N", "BOOL", "NULL", "B", "SS", "NS", "BS", "L", "M"];

impl TypedValue {
    /// Read one attribute value from its raw form
    pub fn from_json(attribute: &str, raw: &JsonValue) -> Result<Self> {
        if let Some(tag) = raw
            .as_object()
            .and_then(|tagged| tagged.keys().find(|tag| !TAGS.contains(&tag.as_str())))
        {
            return Err(ReplicationError::UnsupportedAttributeType {
                attribute: attribute.to_string(),
                tag: tag.clone(),
            });
        }

        TypedValue::deserialize(raw).map_err(|error| ReplicationError::MalformedAttribute {
            attribute: attribute.to_string(),
            reason: error.to_string(),
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            TypedValue::String(_) => "S",
            TypedValue::Number(_) => "N",
            TypedValue::Bool(_) => "BOOL",
            TypedValue::Null(_) => "NULL",
            TypedValue::Binary(_) => "B",
            TypedValue::StringSet(_) => "SS",
            TypedValue::NumberSet(_) => "NS",
            TypedValue::BinarySet(_) => "BS",
            TypedValue::List(_) => "L",
            TypedValue::Map(_) => "M",
        }
    }
}

/// Read a raw new image into typed attributes
pub fn parse_image(raw: &JsonValue) -> Result<Image> {
    let attributes = raw
        .as_object()
        .ok_or_else(|| ReplicationError::MalformedAttribute {
            attribute: "NewImage".to_string(),
            reason: "expected an object of attributes".to_string(),
        })?;

    attributes
        .iter()
        .map(|(name, value)| Ok((name.clone(), TypedValue::from_json(name, value)?)))
        .collect()
}

impl ChangeEvent {
    /// Only inserts and modifications are mirrored
    pub fn is_replicable(&self) -> bool {
        matches!(self.event_name, EventName::Insert | EventName::Modify)
    }
}
