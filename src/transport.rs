use crate::error::Result;
use crate::translator::ErrorKind;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod broker;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
pub mod retry_runner;
pub mod runtime;

pub const READY_MESSAGE: &str = "Bing Maps Imagery Service Initialized.";
pub const RESULT_LOG_TITLE: &str = "Bing Maps Imagery Service Result";

/// One failed record, as handed to the exception loggers.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub rule: Option<&'static str>,
    pub message: String,
    pub data: JsonValue,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>, data: JsonValue) -> Self {
        Self {
            kind,
            rule: None,
            message: message.into(),
            data,
        }
    }

    pub fn with_rule(mut self, rule: &'static str) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "kind": self.kind.as_str(),
            "rule": self.rule,
            "message": self.message,
            "data": self.data,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

impl Display for ErrorReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.rule {
            Some(rule) => write!(f, "{} error ({rule}): {}", self.kind, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// The collaborator that delivers records and receives everything the
/// translator produces.
#[async_trait]
pub trait PipelineHost: Send + Sync {
    /// Publishes `result` for the input `data`. Fails when no output took it.
    async fn pipe(&self, data: &JsonValue, result: &JsonValue) -> Result<()>;

    /// Reports a failure. Never fails itself.
    async fn log_exception(&self, report: &ErrorReport);

    /// Emits an informational log entry. Never fails itself.
    async fn log(&self, entry: &JsonValue);

    async fn ready(&self) {
        self.log(&JsonValue::String(READY_MESSAGE.to_string()))
            .await;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportHealth {
    Idle,
    Starting,
    Running,
    Degraded { reason: String },
    Shutdown,
}

/// Future that completes once every worker of a transport has stopped.
pub struct TransportRun {
    name: &'static str,
    future: Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>,
}

impl TransportRun {
    pub fn new<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            future: Box::pin(future),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn wait(self) -> Result<()> {
        self.future.await
    }
}

type RuntimeSpawner = Box<dyn FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send>;

/// Runs a set of spawned worker tasks under one cancellation token.
pub struct TaskTransportRuntime {
    name: &'static str,
    spawner: Option<RuntimeSpawner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    health: Arc<Mutex<TransportHealth>>,
    shutdown: Option<CancellationToken>,
}

impl TaskTransportRuntime {
    pub fn new<F>(name: &'static str, spawner: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send + 'static,
    {
        Self {
            name,
            spawner: Some(Box::new(spawner)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            health: Arc::new(Mutex::new(TransportHealth::Idle)),
            shutdown: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn health(&self) -> TransportHealth {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_health(&self, value: TransportHealth) {
        set_health(&self.health, value);
    }

    pub fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        let Some(spawner) = self.spawner.take() else {
            crate::bail_err!("transport `{}` already started", self.name);
        };

        self.update_health(TransportHealth::Starting);
        let spawned = spawner(shutdown.clone());
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(spawned);

        self.shutdown = Some(shutdown);
        self.update_health(TransportHealth::Running);
        Ok(())
    }

    pub fn run(&self) -> TransportRun {
        let tasks = Arc::clone(&self.tasks);
        let health = Arc::clone(&self.health);
        let name = self.name;

        TransportRun::new(name, async move {
            loop {
                let handle = tasks.lock().unwrap_or_else(PoisonError::into_inner).pop();

                match handle {
                    Some(handle) => {
                        if let Err(join_err) = handle.await {
                            set_health(
                                &health,
                                TransportHealth::Degraded {
                                    reason: format!("task join error: {join_err}"),
                                },
                            );
                            crate::bail_err!(
                                "transport `{name}` worker terminated unexpectedly: {join_err}"
                            );
                        }
                    }
                    None => {
                        set_health(&health, TransportHealth::Shutdown);
                        return Ok(());
                    }
                }
            }
        })
    }

    pub fn shutdown(&mut self) {
        if let Some(token) = self.shutdown.as_ref() {
            token.cancel();
        }
        self.update_health(TransportHealth::Shutdown);
    }
}

fn set_health(health: &Mutex<TransportHealth>, value: TransportHealth) {
    *health.lock().unwrap_or_else(PoisonError::into_inner) = value;
}
