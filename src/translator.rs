pub mod query;
pub mod record;
pub mod response;
pub mod rules;

use crate::codec::http::ImageryClient;
use crate::domain::{ImagerySettings, OperationMode};
use crate::metrics::metrics;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;

pub use record::RequestRecord;
pub use response::{translate_response, ErrorKind, ResponseShape, TranslateError, Translation};
pub use rules::{validate, ValidationError, ValidationRule};
pub use query::build_url;

/// Everything needed to issue the upstream call for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPlan {
    pub url: String,
    pub shape: ResponseShape,
}

/// Turns request records into imagery API calls and their results.
#[derive(Clone)]
pub struct RequestTranslator {
    settings: Arc<ImagerySettings>,
    client: Arc<dyn ImageryClient>,
}

impl RequestTranslator {
    pub fn new(settings: Arc<ImagerySettings>, client: Arc<dyn ImageryClient>) -> Self {
        Self { settings, client }
    }

    pub fn settings(&self) -> &ImagerySettings {
        &self.settings
    }

    pub fn mode(&self) -> OperationMode {
        self.settings.mode
    }

    pub fn validate(&self, record: &RequestRecord) -> Result<(), ValidationError> {
        rules::validate(self.settings.mode, record)
    }

    /// Validates the record and resolves the URL without calling upstream.
    pub fn plan(&self, record: &RequestRecord) -> Result<RequestPlan, ValidationError> {
        self.validate(record)?;
        Ok(RequestPlan {
            url: build_url(&self.settings, record),
            shape: response_shape(self.settings.mode, record),
        })
    }

    /// Single-attempt translation: validate, call upstream once, interpret.
    pub async fn translate(&self, record: &RequestRecord) -> Result<Translation, TranslateError> {
        let plan = self.plan(record)?;

        let started = Instant::now();
        let response =
            self.client
                .get(&plan.url)
                .await
                .map_err(|source| TranslateError::Transport {
                    endpoint: query::redact_query(&plan.url).to_string(),
                    source,
                })?;
        metrics().record_http_request(
            self.settings.mode.as_str(),
            response.status,
            started.elapsed(),
        );

        translate_response(plan.shape, response)
    }
}

impl std::fmt::Debug for RequestTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTranslator")
            .field("mode", &self.settings.mode)
            .finish()
    }
}

pub fn response_shape(mode: OperationMode, record: &RequestRecord) -> ResponseShape {
    match mode {
        OperationMode::StaticMap if is_metadata_only(record) => {
            ResponseShape::Metadata { publish: false }
        }
        OperationMode::StaticMap => ResponseShape::Image,
        OperationMode::ImageryMetadata => ResponseShape::Metadata { publish: true },
    }
}

/// `mmd` set to the number 1 asks the static map endpoint for metadata only.
fn is_metadata_only(record: &RequestRecord) -> bool {
    matches!(record.get("mmd"), Some(JsonValue::Number(n)) if n.as_f64() == Some(1.0))
}
