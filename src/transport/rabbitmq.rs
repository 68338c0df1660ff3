#![forbid(unsafe_code)]

use crate::config::{AckMode, PipelineConfig};
use crate::dispatcher::{process_record, RecordOutcome};
use crate::error::Result;
use crate::metrics::metrics;
use crate::translator::RequestTranslator;
use crate::transport::broker::BrokerPublisher;
use crate::transport::retry_runner::{run_retry_loop, RetryContext, RetrySettings};
use crate::transport::{PipelineHost, TaskTransportRuntime, TransportHealth, TransportRun};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions,
    },
    publisher_confirm::Confirmation,
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use std::future::Future;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_executor_trait::Tokio as TokioExecutor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const TARGET: &str = "imagery_bridge::rabbitmq";

#[async_trait]
pub trait RabbitmqConsumer: Send + 'static {
    async fn configure_prefetch(&mut self, _prefetch: u16) -> StdResult<(), RabbitmqConsumerError> {
        Ok(())
    }

    async fn next_delivery(&mut self)
        -> StdResult<Option<RabbitmqDelivery>, RabbitmqConsumerError>;

    async fn ack(&mut self, delivery_tag: u64) -> StdResult<(), RabbitmqConsumerError>;

    async fn nack(
        &mut self,
        delivery_tag: u64,
        requeue: bool,
    ) -> StdResult<(), RabbitmqConsumerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RabbitmqConsumerError {
    message: String,
}

impl RabbitmqConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitmqDelivery {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub message_id: Option<String>,
}

impl RabbitmqDelivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            redelivered: false,
            message_id: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RabbitmqConsumerConfig {
    pub url: String,
    pub queue: String,
    pub ack_mode: AckMode,
    pub prefetch: Option<u16>,
    pub retry: RetrySettings,
}

impl RabbitmqConsumerConfig {
    pub fn from_pipeline(pipeline: &PipelineConfig) -> Self {
        Self {
            url: pipeline.broker.clone(),
            queue: pipeline.input_pipe.clone(),
            ack_mode: pipeline.ack_mode,
            prefetch: pipeline.prefetch,
            retry: pipeline.retry.clone(),
        }
    }
}

pub struct LapinRabbitmqConsumer {
    config: RabbitmqConsumerConfig,
    _connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl LapinRabbitmqConsumer {
    pub async fn connect(config: RabbitmqConsumerConfig) -> StdResult<Self, RabbitmqConsumerError> {
        let (connection, channel, consumer) = Self::open(&config).await?;
        Ok(Self {
            config,
            _connection: connection,
            channel,
            consumer,
        })
    }

    async fn open(
        config: &RabbitmqConsumerConfig,
    ) -> StdResult<(Connection, Channel, Consumer), RabbitmqConsumerError> {
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());
        let connection = Connection::connect(&config.url, properties)
            .await
            .map_err(|err| RabbitmqConsumerError::new(format!("failed to connect: {err}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|err| RabbitmqConsumerError::new(format!("failed to open channel: {err}")))?;

        if let Some(prefetch) = config.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|err| {
                    RabbitmqConsumerError::new(format!(
                        "failed to configure prefetch (prefetch={prefetch}): {err}"
                    ))
                })?;
        }

        let consumer = Self::start_consumer(&channel, config).await?;
        Ok((connection, channel, consumer))
    }

    async fn reconnect(&mut self) -> StdResult<(), RabbitmqConsumerError> {
        let (connection, channel, consumer) = Self::open(&self.config).await?;
        self._connection = connection;
        self.channel = channel;
        self.consumer = consumer;
        Ok(())
    }

    async fn start_consumer(
        channel: &Channel,
        config: &RabbitmqConsumerConfig,
    ) -> StdResult<Consumer, RabbitmqConsumerError> {
        let options = BasicConsumeOptions {
            no_ack: matches!(config.ack_mode, AckMode::Auto),
            ..BasicConsumeOptions::default()
        };

        let consumer_tag = format!("imagery-bridge-{}", Uuid::new_v4());

        channel
            .basic_consume(&config.queue, &consumer_tag, options, FieldTable::default())
            .await
            .map_err(|err| {
                RabbitmqConsumerError::new(format!(
                    "failed to start consumer on queue `{}`: {err}",
                    config.queue
                ))
            })
    }

    fn convert_delivery(delivery: Delivery) -> RabbitmqDelivery {
        RabbitmqDelivery {
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            body: delivery.data,
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        }
    }
}

#[async_trait]
impl RabbitmqConsumer for LapinRabbitmqConsumer {
    async fn configure_prefetch(&mut self, prefetch: u16) -> StdResult<(), RabbitmqConsumerError> {
        self.config.prefetch = Some(prefetch);
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|err| RabbitmqConsumerError::new(format!("basic_qos failed: {err}")))
    }

    async fn next_delivery(
        &mut self,
    ) -> StdResult<Option<RabbitmqDelivery>, RabbitmqConsumerError> {
        loop {
            match self.consumer.next().await {
                Some(Ok(delivery)) => return Ok(Some(Self::convert_delivery(delivery))),
                Some(Err(err)) => {
                    tracing::warn!(
                        target: TARGET,
                        error = %err,
                        "rabbitmq consumer error; attempting reconnect"
                    );
                    self.reconnect().await?;
                }
                None => {
                    tracing::warn!(
                        target: TARGET,
                        "rabbitmq consumer stream ended; attempting reconnect"
                    );
                    self.reconnect().await?;
                }
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> StdResult<(), RabbitmqConsumerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|err| RabbitmqConsumerError::new(format!("ack failed: {err}")))
    }

    async fn nack(
        &mut self,
        delivery_tag: u64,
        requeue: bool,
    ) -> StdResult<(), RabbitmqConsumerError> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };

        self.channel
            .basic_nack(delivery_tag, options)
            .await
            .map_err(|err| RabbitmqConsumerError::new(format!("nack failed: {err}")))
    }
}

/// Publishes to queues through the default exchange with publisher confirms.
pub struct LapinBrokerPublisher {
    _connection: Connection,
    channel: Channel,
}

impl LapinBrokerPublisher {
    pub async fn connect(url: &str) -> Result<Self> {
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());
        let connection = Connection::connect(url, properties).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        Ok(Self {
            _connection: connection,
            channel,
        })
    }
}

#[async_trait]
impl BrokerPublisher for LapinBrokerPublisher {
    async fn publish(&self, queue: &str, body: &[u8], timeout: Option<Duration>) -> Result<()> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_delivery_mode(2);

        let confirm = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await?;

        let confirmation = match timeout {
            Some(duration) => tokio::time::timeout(duration, confirm)
                .await
                .map_err(|_| crate::err!("publisher confirm for `{queue}` timed out"))??,
            None => confirm.await?,
        };

        match confirmation {
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => Err(crate::err!("publisher confirm for `{queue}` returned nack")),
        }
    }
}

/// Binds input pipe consumers to the translator and pipeline host.
pub struct PipelineRuntime {
    inner: TaskTransportRuntime,
    queue: String,
    consumer_count: usize,
}

impl PipelineRuntime {
    pub async fn build_with<C, F, Fut>(
        config: RabbitmqConsumerConfig,
        consumers: usize,
        translator: Arc<RequestTranslator>,
        host: Arc<dyn PipelineHost>,
        mut factory: F,
    ) -> StdResult<Self, RabbitmqConsumerError>
    where
        C: RabbitmqConsumer + Send,
        F: FnMut(RabbitmqConsumerConfig) -> Fut,
        Fut: Future<Output = StdResult<C, RabbitmqConsumerError>>,
    {
        let mut instances = Vec::with_capacity(consumers);

        for _ in 0..consumers.max(1) {
            let mut consumer = factory(config.clone()).await?;
            if let Some(prefetch) = config.prefetch {
                consumer.configure_prefetch(prefetch).await?;
            }

            instances.push(PipelineConsumer {
                queue: config.queue.clone(),
                consumer,
                ack_mode: config.ack_mode,
                translator: Arc::clone(&translator),
                host: Arc::clone(&host),
                disconnected: false,
            });
        }

        let consumer_count = instances.len();
        let retry = config.retry.clone();

        let inner = TaskTransportRuntime::new("rabbitmq", move |shutdown| {
            instances
                .into_iter()
                .map(|instance| {
                    let shutdown = shutdown.clone();
                    let retry = retry.clone();
                    tokio::spawn(async move {
                        instance.run(retry, shutdown).await;
                    })
                })
                .collect()
        });

        Ok(Self {
            inner,
            queue: config.queue,
            consumer_count,
        })
    }

    /// Connects real `lapin` consumers for the configured input pipe.
    pub async fn connect(
        config: RabbitmqConsumerConfig,
        consumers: usize,
        translator: Arc<RequestTranslator>,
        host: Arc<dyn PipelineHost>,
    ) -> StdResult<Self, RabbitmqConsumerError> {
        Self::build_with(
            config,
            consumers,
            translator,
            host,
            LapinRabbitmqConsumer::connect,
        )
        .await
    }

    pub fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn health(&self) -> TransportHealth {
        self.inner.health()
    }

    pub fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.inner.start(shutdown)
    }

    pub fn run(&self) -> TransportRun {
        self.inner.run()
    }

    pub fn shutdown(&mut self) {
        self.inner.shutdown();
    }
}

struct PipelineConsumer<C>
where
    C: RabbitmqConsumer + Send,
{
    queue: String,
    consumer: C,
    ack_mode: AckMode,
    translator: Arc<RequestTranslator>,
    host: Arc<dyn PipelineHost>,
    disconnected: bool,
}

impl<C> PipelineConsumer<C>
where
    C: RabbitmqConsumer + Send,
{
    async fn run(self, retry: RetrySettings, shutdown: CancellationToken) {
        let mut context = PipelineRetryContext {
            instance: self,
            shutdown: shutdown.clone(),
        };

        run_retry_loop(shutdown, retry, Duration::from_millis(50), &mut context).await;
    }

    fn mark_connected(&mut self) {
        if self.disconnected {
            crate::imagery_event!(info, TARGET, "transport_reconnected", pipe = self.queue);
            self.disconnected = false;
        }
    }

    fn mark_disconnected(&mut self, err: &RabbitmqConsumerError) {
        if !self.disconnected {
            crate::imagery_event!(
                warn,
                TARGET,
                "transport_disconnected",
                pipe = self.queue,
                error = err
            );
            self.disconnected = true;
        }
    }

    async fn handle_delivery(&mut self, delivery: RabbitmqDelivery, shutdown: &CancellationToken) {
        let delivery_tag = delivery.delivery_tag;
        let manual = matches!(self.ack_mode, AckMode::Manual);

        if shutdown.is_cancelled() {
            if manual {
                if let Err(err) = self.consumer.nack(delivery_tag, true).await {
                    crate::imagery_event!(
                        error,
                        TARGET,
                        "nack_failed",
                        pipe = self.queue,
                        delivery_tag = delivery_tag,
                        error = err
                    );
                }
            }
            return;
        }

        crate::imagery_event!(
            info,
            TARGET,
            "record_received",
            pipe = self.queue,
            mode = self.translator.mode(),
            delivery_tag = delivery_tag,
            message_id = delivery.message_id.as_deref().unwrap_or("-")
        );

        metrics().inc_records_inflight();
        let outcome =
            process_record(&self.translator, self.host.as_ref(), &delivery.body).await;
        metrics().dec_records_inflight();

        match outcome {
            RecordOutcome::Reported(kind) => crate::imagery_event!(
                warn,
                TARGET,
                "record_reported",
                pipe = self.queue,
                delivery_tag = delivery_tag,
                kind = kind
            ),
            other => crate::imagery_event!(
                info,
                TARGET,
                "record_completed",
                pipe = self.queue,
                delivery_tag = delivery_tag,
                outcome = other.as_str()
            ),
        }

        // Failures are reported, not redelivered.
        if manual {
            if let Err(err) = self.consumer.ack(delivery_tag).await {
                crate::imagery_event!(
                    error,
                    TARGET,
                    "ack_failed",
                    pipe = self.queue,
                    delivery_tag = delivery_tag,
                    error = err
                );
            }
        }
    }
}

struct PipelineRetryContext<C>
where
    C: RabbitmqConsumer + Send,
{
    instance: PipelineConsumer<C>,
    shutdown: CancellationToken,
}

#[async_trait]
impl<C> RetryContext for PipelineRetryContext<C>
where
    C: RabbitmqConsumer + Send,
{
    type Item = RabbitmqDelivery;
    type Error = RabbitmqConsumerError;

    async fn poll(&mut self) -> StdResult<Option<Self::Item>, Self::Error> {
        self.instance.consumer.next_delivery().await
    }

    async fn handle_item(&mut self, item: Self::Item) {
        self.instance.mark_connected();
        self.instance.handle_delivery(item, &self.shutdown).await;
    }

    async fn report_error(&mut self, error: &Self::Error, delay: Duration) {
        self.instance.mark_disconnected(error);
        crate::imagery_event!(
            error,
            TARGET,
            "consumer_receive_failed",
            pipe = self.instance.queue,
            retry_in = humantime::format_duration(delay),
            error = error
        );
    }
}
