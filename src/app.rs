use crate::codec::http::ReqwestImageryClient;
use crate::config::ServiceConfig;
use crate::error::{Context, Result};
use crate::metrics;
use crate::translator::RequestTranslator;
use crate::transport::broker::BrokerPipelineHost;
use crate::transport::rabbitmq::{LapinBrokerPublisher, PipelineRuntime, RabbitmqConsumerConfig};
use crate::transport::PipelineHost;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub struct ImageryService {
    runtime: PipelineRuntime,
    host: Arc<dyn PipelineHost>,
    drain_timeout: Duration,
    shutdown: CancellationToken,
}

impl ImageryService {
    /// Validates configuration and connects the consumer and publisher.
    pub async fn initialise(config: ServiceConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let translator = Arc::new(build_translator(&config)?);

        let publisher = LapinBrokerPublisher::connect(&config.pipeline.broker)
            .await
            .context("failed to connect result publisher")?;
        let host: Arc<dyn PipelineHost> = Arc::new(BrokerPipelineHost::new(
            Arc::new(publisher),
            config.pipeline.routes(),
            config.pipeline.publish_timeout()?,
        ));

        let runtime = PipelineRuntime::connect(
            RabbitmqConsumerConfig::from_pipeline(&config.pipeline),
            config.pipeline.consumers,
            Arc::clone(&translator),
            Arc::clone(&host),
        )
        .await
        .with_context(|| {
            format!(
                "failed to consume input pipe `{}`",
                config.pipeline.input_pipe
            )
        })?;

        tracing::info!(
            target: "imagery_bridge::app",
            event = "service_initialised",
            mode = %translator.mode(),
            pipe = %runtime.queue(),
            consumers = runtime.consumer_count()
        );

        Ok(Self::from_parts(
            runtime,
            host,
            config.pipeline.drain_timeout()?,
        ))
    }

    pub fn from_parts(
        runtime: PipelineRuntime,
        host: Arc<dyn PipelineHost>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            host,
            drain_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the service like Ctrl+C does.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            mut runtime,
            host,
            drain_timeout,
            shutdown,
        } = self;

        host.ready().await;
        runtime.start(shutdown.clone())?;
        let run = runtime.run();
        let name = run.name();
        let mut consumers = tokio::spawn(run.wait());

        tracing::info!(
            target: "imagery_bridge::app",
            "imagery bridge ready; press Ctrl+C to stop"
        );

        tokio::select! {
            res = &mut consumers => {
                tracing::warn!(
                    target: "imagery_bridge::app",
                    transport = name,
                    "consumer runtime stopped unexpectedly"
                );
                return match res {
                    Ok(result) => result,
                    Err(join_err) => Err(crate::err!("consumer runtime join error: {join_err}")),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "imagery_bridge::app", "shutdown signal received");
            }
            _ = shutdown.cancelled() => {
                tracing::info!(target: "imagery_bridge::app", "shutdown requested");
            }
        }

        runtime.shutdown();

        let drained = timeout(drain_timeout, &mut consumers).await;
        metrics::log_summary();

        match drained {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(crate::err!("consumer runtime join error: {join_err}")),
            Err(_) => {
                tracing::error!(
                    target: "imagery_bridge::app",
                    timeout_secs = drain_timeout.as_secs_f64(),
                    "graceful shutdown exceeded pipeline.drain_timeout; aborting consumers"
                );
                consumers.abort();
                Err(crate::err!(
                    "graceful shutdown timed out after {}",
                    humantime::format_duration(drain_timeout)
                ))
            }
        }
    }
}

/// Translator wired to the real HTTP client for the configured mode.
pub fn build_translator(config: &ServiceConfig) -> Result<RequestTranslator> {
    let settings = Arc::new(config.settings()?);
    let client = Arc::new(ReqwestImageryClient::new()?);
    Ok(RequestTranslator::new(settings, client))
}
