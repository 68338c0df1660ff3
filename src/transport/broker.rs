#![forbid(unsafe_code)]

use crate::codec::payload::payload_to_bytes;
use crate::error::{Context, Result};
use crate::transport::{ErrorReport, PipelineHost};
use async_trait::async_trait;
use ::metrics::{Key, Label, Level, Metadata};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Queue-level publish used by the pipeline host.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, queue: &str, body: &[u8], timeout: Option<Duration>) -> Result<()>;
}

/// Queues the host writes to, besides the input pipe it consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipeRoutes {
    pub output_pipes: Vec<String>,
    pub loggers: Vec<String>,
    pub exception_loggers: Vec<String>,
}

/// [`PipelineHost`] that fans results and logs out to broker queues.
pub struct BrokerPipelineHost {
    publisher: Arc<dyn BrokerPublisher>,
    routes: PipeRoutes,
    timeout: Option<Duration>,
}

impl BrokerPipelineHost {
    pub fn new(
        publisher: Arc<dyn BrokerPublisher>,
        routes: PipeRoutes,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            publisher,
            routes,
            timeout,
        }
    }

    pub fn routes(&self) -> &PipeRoutes {
        &self.routes
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        let publisher = Arc::clone(&self.publisher);
        let result = publish_with_timeout("rabbitmq", self.timeout, |timeout| async move {
            publisher.publish(queue, body, timeout).await
        })
        .await;

        match result {
            Ok(()) => crate::metrics::metrics().inc_broker_publish_success(),
            Err(_) => crate::metrics::metrics().inc_broker_publish_failure(),
        }
        result
    }

    /// Best-effort fan-out for log traffic; failures are traced, never returned.
    async fn broadcast(&self, queues: &[String], body: &[u8], event: &'static str) {
        for queue in queues {
            if let Err(err) = self.publish(queue, body).await {
                crate::imagery_event!(
                    warn,
                    "imagery_bridge::broker",
                    event,
                    pipe = queue,
                    error = err
                );
            }
        }
    }
}

#[async_trait]
impl PipelineHost for BrokerPipelineHost {
    /// Offers the result to every output pipe. Fails only when no pipe took
    /// it; pipes that reject a partially delivered result are traced.
    async fn pipe(&self, _data: &JsonValue, result: &JsonValue) -> Result<()> {
        let body = payload_to_bytes(result).context("failed to serialise result")?;
        let mut delivered = 0usize;
        let mut failures = Vec::new();
        for queue in &self.routes.output_pipes {
            match self.publish(queue, &body).await {
                Ok(()) => delivered += 1,
                Err(err) => failures.push((queue, err)),
            }
        }

        if delivered == 0 {
            if let Some((queue, err)) = failures.into_iter().next() {
                return Err(err).with_context(|| {
                    format!("failed to publish result to any output pipe (first: `{queue}`)")
                });
            }
            return Ok(());
        }

        for (queue, err) in failures {
            crate::imagery_event!(
                warn,
                "imagery_bridge::broker",
                "partial_publish",
                pipe = queue,
                delivered = delivered,
                error = err
            );
        }
        Ok(())
    }

    async fn log_exception(&self, report: &ErrorReport) {
        tracing::error!(
            target: "imagery_bridge::broker",
            event = "exception_reported",
            kind = %report.kind,
            rule = report.rule.unwrap_or("-"),
            error = %report.message
        );

        match payload_to_bytes(&report.to_json()) {
            Ok(body) => {
                self.broadcast(&self.routes.exception_loggers, &body, "exception_log_failed")
                    .await
            }
            Err(err) => tracing::warn!(
                target: "imagery_bridge::broker",
                event = "exception_log_failed",
                error = %err
            ),
        }
    }

    async fn log(&self, entry: &JsonValue) {
        match payload_to_bytes(entry) {
            Ok(body) => self.broadcast(&self.routes.loggers, &body, "log_failed").await,
            Err(err) => tracing::warn!(
                target: "imagery_bridge::broker",
                event = "log_failed",
                error = %err
            ),
        }
    }

    async fn ready(&self) {
        tracing::info!(
            target: "imagery_bridge::broker",
            event = "pipeline_ready",
            outputs = self.routes.output_pipes.len(),
            "{}",
            super::READY_MESSAGE
        );
        self.log(&JsonValue::String(super::READY_MESSAGE.to_string()))
            .await;
    }
}

pub async fn publish_with_timeout<F, Fut, E>(
    transport: &'static str,
    timeout: Option<Duration>,
    publish: F,
) -> std::result::Result<(), E>
where
    F: FnOnce(Option<Duration>) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
{
    let start = Instant::now();
    let result = publish(timeout).await;
    match result.as_ref() {
        Ok(_) => record_publish_metrics(transport, "success", start.elapsed()),
        Err(_) => record_publish_metrics(transport, "error", start.elapsed()),
    }
    result
}

fn record_publish_metrics(transport: &str, status: &str, elapsed: Duration) {
    let labels = vec![
        Label::new("transport", transport.to_owned()),
        Label::new("status", status.to_owned()),
    ];

    let counter_key = Key::from_parts("imagery_broker_publish_total", labels.clone());
    let histogram_key = Key::from_parts("imagery_broker_publish_elapsed_ms", labels);
    let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

    ::metrics::with_recorder(|recorder| {
        recorder
            .register_counter(&counter_key, &metadata)
            .increment(1);
        recorder
            .register_histogram(&histogram_key, &metadata)
            .record(elapsed.as_secs_f64() * 1000.0);
    });
}
