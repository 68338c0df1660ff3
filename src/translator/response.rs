use crate::codec::http::{body_status_code, error_details, UpstreamResponse};
use crate::codec::payload::ImagePayload;
use crate::error::BridgeError;
use crate::translator::rules::ValidationError;
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// How an upstream body has to be interpreted for a given request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    /// Binary image, wrapped into a data URI.
    Image,
    /// JSON metadata. `publish` is false for static map metadata-only
    /// requests, whose successful result is never forwarded.
    Metadata { publish: bool },
}

/// Outcome of a successful translation.
#[derive(Clone, Debug, PartialEq)]
pub enum Translation {
    Publish(JsonValue),
    Withheld(JsonValue),
}

impl Translation {
    pub fn value(&self) -> &JsonValue {
        match self {
            Translation::Publish(value) | Translation::Withheld(value) => value,
        }
    }

    pub fn into_value(self) -> JsonValue {
        match self {
            Translation::Publish(value) | Translation::Withheld(value) => value,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Translation::Publish(_))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Transport,
    Upstream,
    Publish,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Publish => "publish",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request to `{endpoint}` failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: BridgeError,
    },
    #[error("imagery API returned status {status}: {detail}")]
    Upstream { status: u16, detail: String },
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::Validation(_) => ErrorKind::Validation,
            TranslateError::Transport { .. } => ErrorKind::Transport,
            TranslateError::Upstream { .. } => ErrorKind::Upstream,
        }
    }

    fn upstream(status: u16, body: Option<&JsonValue>) -> Self {
        let detail = body
            .and_then(error_details)
            .unwrap_or_else(|| format!("HTTP status {status}"));
        TranslateError::Upstream { status, detail }
    }
}

pub fn translate_response(
    shape: ResponseShape,
    response: UpstreamResponse,
) -> Result<Translation, TranslateError> {
    match shape {
        ResponseShape::Image => {
            if !response.is_ok() {
                let body = response.json().ok();
                return Err(TranslateError::upstream(response.status, body.as_ref()));
            }
            let payload = ImagePayload::new(response.content_type(), response.body.to_vec());
            Ok(Translation::Publish(payload.to_json()))
        }
        ResponseShape::Metadata { publish } => {
            let body = response.json();

            if !response.is_ok() {
                return Err(TranslateError::upstream(response.status, body.ok().as_ref()));
            }

            let body = body.map_err(|err| TranslateError::Upstream {
                status: response.status,
                detail: format!("response body is not valid JSON: {err}"),
            })?;

            if let Some(code) = body_status_code(&body).filter(|code| *code != 200) {
                return Err(TranslateError::upstream(code, Some(&body)));
            }

            Ok(if publish {
                Translation::Publish(body)
            } else {
                Translation::Withheld(body)
            })
        }
    }
}
