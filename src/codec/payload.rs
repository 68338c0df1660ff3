#![forbid(unsafe_code)]

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A binary image plus the content type the upstream declared for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePayload {
    content_type: String,
    data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(content_type: Option<&str>, data: impl Into<Vec<u8>>) -> Self {
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        Self {
            content_type,
            data: data.into(),
        }
    }

    /// `data:<content-type>;base64,<body>`
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64_ENGINE.encode(&self.data)
        )
    }

    /// Result record published for a retrieved image.
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        object.insert("image".to_string(), JsonValue::String(self.to_data_uri()));
        JsonValue::Object(object)
    }
}

/// Serialises an outbound message body.
pub fn payload_to_bytes(payload: &JsonValue) -> Result<Vec<u8>, serde_json::Error> {
    match payload {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::String(text) => Ok(text.as_bytes().to_vec()),
        other => serde_json::to_vec(other),
    }
}
