#![forbid(unsafe_code)]

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;

/// Raw upstream answer, before any mode-specific interpretation.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn json(&self) -> std::result::Result<JsonValue, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Outbound GET against the imagery REST API.
#[async_trait]
pub trait ImageryClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse>;
}

/// `reqwest` backed client. No timeout or retry is applied to the call.
#[derive(Clone, Debug, Default)]
pub struct ReqwestImageryClient {
    client: reqwest::Client,
}

impl ReqwestImageryClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("imagery-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageryClient for ReqwestImageryClient {
    /// Errors carry no URL: the query holds the API key.
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Human readable failure text from an imagery API error body.
///
/// Prefers `errorDetails` (joined with `; ` when it is a list), then
/// `statusDescription`.
pub fn error_details(body: &JsonValue) -> Option<String> {
    match body.get("errorDetails") {
        Some(JsonValue::Array(items)) if !items.is_empty() => {
            let details: Vec<String> = items
                .iter()
                .map(|item| match item {
                    JsonValue::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect();
            return Some(details.join("; "));
        }
        Some(JsonValue::String(text)) if !text.is_empty() => return Some(text.clone()),
        _ => {}
    }

    body.get("statusDescription")
        .and_then(JsonValue::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// The body-level `statusCode`, when the payload carries one.
pub fn body_status_code(body: &JsonValue) -> Option<u16> {
    match body.get("statusCode")? {
        JsonValue::Number(number) => number.as_u64().and_then(|code| u16::try_from(code).ok()),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_details_prefers_detail_list() {
        let body = json!({
            "statusCode": 401,
            "statusDescription": "Unauthorized",
            "errorDetails": ["Access was denied.", "Check the key."]
        });
        assert_eq!(
            error_details(&body).as_deref(),
            Some("Access was denied.; Check the key.")
        );
        assert_eq!(body_status_code(&body), Some(401));
    }

    #[test]
    fn error_details_falls_back_to_description() {
        let body = json!({ "statusCode": "400", "statusDescription": "Bad Request" });
        assert_eq!(error_details(&body).as_deref(), Some("Bad Request"));
        assert_eq!(body_status_code(&body), Some(400));
        assert_eq!(error_details(&json!({})), None);
    }

    #[tokio::test]
    async fn reqwest_client_reports_status_and_content_type() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/Imagery/Map/Road");
                then.status(200)
                    .header("content-type", "image/jpeg")
                    .body([0xffu8, 0xd8, 0xff]);
            })
            .await;

        let client = ReqwestImageryClient::new().expect("client");
        let response = client
            .get(&server.url("/Imagery/Map/Road?key=abc"))
            .await
            .expect("response");

        mock.assert_async().await;
        assert!(response.is_ok());
        assert_eq!(response.content_type(), Some("image/jpeg"));
        assert_eq!(response.body.as_ref(), &[0xff, 0xd8, 0xff]);
    }
}
