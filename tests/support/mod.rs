#![allow(dead_code)]

use async_trait::async_trait;
use imagery_bridge::codec::http::{ImageryClient, UpstreamResponse};
use imagery_bridge::domain::{ImagerySettings, OperationMode};
use imagery_bridge::error::Result;
use imagery_bridge::translator::RequestTranslator;
use imagery_bridge::transport::{ErrorReport, PipelineHost};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const API_KEY: &str = "test-key";
pub const STATIC_MAP_BASE: &str = "http://dev.virtualearth.net/REST/V1/Imagery/Map/";
pub const METADATA_BASE: &str = "http://dev.virtualearth.net/REST/v1/Imagery/Metadata/";

pub fn settings(mode: OperationMode) -> ImagerySettings {
    settings_with_base(mode, STATIC_MAP_BASE, METADATA_BASE)
}

pub fn settings_with_base(
    mode: OperationMode,
    static_map_url: &str,
    imagery_metadata_url: &str,
) -> ImagerySettings {
    ImagerySettings {
        mode,
        api_key: API_KEY.to_string(),
        static_map_url: static_map_url.to_string(),
        imagery_metadata_url: imagery_metadata_url.to_string(),
    }
}

pub fn translator(settings: ImagerySettings, client: Arc<dyn ImageryClient>) -> RequestTranslator {
    RequestTranslator::new(Arc::new(settings), client)
}

/// Client that answers every request with the same canned response.
pub struct StaticClient {
    response: UpstreamResponse,
    requests: Mutex<Vec<String>>,
}

impl StaticClient {
    pub fn new(response: UpstreamResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn json(status: u16, body: JsonValue) -> Arc<Self> {
        Self::new(UpstreamResponse::new(
            status,
            Some("application/json"),
            serde_json::to_vec(&body).expect("serialize body"),
        ))
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests guard").clone()
    }
}

#[async_trait]
impl ImageryClient for StaticClient {
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        self.requests
            .lock()
            .expect("requests guard")
            .push(url.to_string());
        Ok(self.response.clone())
    }
}

/// Client whose every request fails before a response arrives.
#[derive(Default)]
pub struct FailingClient {
    requests: Mutex<Vec<String>>,
}

impl FailingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests guard").len()
    }
}

#[async_trait]
impl ImageryClient for FailingClient {
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        self.requests
            .lock()
            .expect("requests guard")
            .push(url.to_string());
        Err(imagery_bridge::err!("connection refused"))
    }
}

/// In-memory host recording everything the dispatcher hands over.
#[derive(Default)]
pub struct RecordingHost {
    piped: Mutex<Vec<(JsonValue, JsonValue)>>,
    exceptions: Mutex<Vec<ErrorReport>>,
    logs: Mutex<Vec<JsonValue>>,
    fail_pipe: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_pipe() -> Arc<Self> {
        let host = Self::default();
        host.fail_pipe.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    pub fn piped(&self) -> Vec<(JsonValue, JsonValue)> {
        self.piped.lock().expect("piped guard").clone()
    }

    pub fn exceptions(&self) -> Vec<ErrorReport> {
        self.exceptions.lock().expect("exceptions guard").clone()
    }

    pub fn logs(&self) -> Vec<JsonValue> {
        self.logs.lock().expect("logs guard").clone()
    }
}

#[async_trait]
impl PipelineHost for RecordingHost {
    async fn pipe(&self, data: &JsonValue, result: &JsonValue) -> Result<()> {
        if self.fail_pipe.load(Ordering::SeqCst) {
            imagery_bridge::bail_err!("output pipe unavailable");
        }
        self.piped
            .lock()
            .expect("piped guard")
            .push((data.clone(), result.clone()));
        Ok(())
    }

    async fn log_exception(&self, report: &ErrorReport) {
        self.exceptions
            .lock()
            .expect("exceptions guard")
            .push(report.clone());
    }

    async fn log(&self, entry: &JsonValue) {
        self.logs.lock().expect("logs guard").push(entry.clone());
    }
}
