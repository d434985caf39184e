use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const STATUS_OK: u16 = 200;
/// Some records in the batch were not replicated
pub const STATUS_PARTIAL: u16 = 207;

/// The result handed back to the invoking trigger. `body` is a JSON string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn new(status_code: u16, body: impl Into<JsonValue>) -> Self {
        Self {
            status_code,
            body: body.into().to_string(),
        }
    }
}
