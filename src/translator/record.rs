use crate::translator::rules::ValidationError;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// One inbound imagery request: an open mapping of query fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestRecord {
    fields: JsonMap<String, JsonValue>,
}

impl RequestRecord {
    pub fn new(fields: JsonMap<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// Accepts only JSON objects; anything else cannot carry query fields.
    pub fn from_json(value: JsonValue) -> Result<Self, ValidationError> {
        match value {
            JsonValue::Object(fields) => Ok(Self { fields }),
            other => Err(ValidationError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Whether the field is set to a meaningful value.
    ///
    /// `null`, `false`, `0`, `NaN` and `""` count as absent, matching how the
    /// upstream pipeline has always interpreted request fields.
    pub fn has(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(is_truthy)
    }

    pub fn is_array(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(JsonValue::Array(_)))
    }

    pub fn is_string(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(JsonValue::String(_)))
    }

    pub fn is_str(&self, field: &str, expected: &str) -> bool {
        matches!(self.fields.get(field), Some(JsonValue::String(value)) if value == expected)
    }

    /// Text form of a present field, or an empty string when absent.
    pub fn render(&self, field: &str) -> String {
        match self.fields.get(field) {
            Some(value) if is_truthy(value) => render_value(value),
            _ => String::new(),
        }
    }

    /// Text form of a present array field with a custom separator.
    pub fn render_joined(&self, field: &str, separator: &str) -> String {
        match self.fields.get(field) {
            Some(JsonValue::Array(items)) => join_items(items, separator),
            Some(value) if is_truthy(value) => render_value(value),
            _ => String::new(),
        }
    }
}

impl From<JsonMap<String, JsonValue>> for RequestRecord {
    fn from(fields: JsonMap<String, JsonValue>) -> Self {
        Self::new(fields)
    }
}

pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number
            .as_f64()
            .map(|n| n != 0.0 && !n.is_nan())
            .unwrap_or(true),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Renders a value the way it appears inside a request URL: arrays are
/// comma-joined and whole floats lose their fractional part.
pub fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(flag) => flag.to_string(),
        JsonValue::Number(number) => render_number(number),
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(items) => join_items(items, ","),
        JsonValue::Object(_) => "[object Object]".to_string(),
    }
}

fn join_items(items: &[JsonValue], separator: &str) -> String {
    items
        .iter()
        .map(|item| match item {
            JsonValue::Null => String::new(),
            other => render_value(other),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn render_number(number: &serde_json::Number) -> String {
    if number.is_f64() {
        if let Some(value) = number.as_f64() {
            if value == 0.0 {
                return "0".to_string();
            }
            if value.fract() == 0.0 && value.abs() < 1e21 {
                return format!("{value:.0}");
            }
        }
    }
    number.to_string()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
