use crate::transport::runtime::sleep_with_shutdown;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff applied between failed broker receives.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    #[serde(with = "humantime_serde_compat")]
    initial: Duration,
    #[serde(with = "humantime_serde_compat")]
    max: Duration,
    multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.clamp(1.1, 10.0),
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[async_trait]
pub trait RetryContext {
    type Item;
    type Error;

    async fn poll(&mut self) -> Result<Option<Self::Item>, Self::Error>;
    async fn handle_item(&mut self, item: Self::Item);
    async fn report_error(&mut self, error: &Self::Error, delay: Duration);
}

/// Polls until shutdown. Items reset the backoff, errors grow it.
pub async fn run_retry_loop<C>(
    shutdown: CancellationToken,
    settings: RetrySettings,
    idle_delay: Duration,
    context: &mut C,
) where
    C: RetryContext + Send,
{
    let mut current = settings.initial();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = context.poll() => match result {
                Ok(Some(item)) => {
                    current = settings.initial();
                    context.handle_item(item).await;
                }
                Ok(None) => {
                    if sleep_with_shutdown(idle_delay, &shutdown).await {
                        break;
                    }
                }
                Err(err) => {
                    let delay = backoff_delay(current);
                    current = next_backoff(current, &settings);
                    context.report_error(&err, delay).await;
                    if sleep_with_shutdown(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }
    }
}

fn backoff_delay(current: Duration) -> Duration {
    current.max(Duration::from_millis(50))
}

fn next_backoff(current: Duration, settings: &RetrySettings) -> Duration {
    let delay = backoff_delay(current);
    let next = (delay.as_millis() as f64 * settings.multiplier()).round();
    let capped = next.min(settings.max().as_millis() as f64);
    std::cmp::min(Duration::from_millis(capped as u64), settings.max())
}

/// Accepts `"250ms"`-style strings or integer milliseconds.
mod humantime_serde_compat {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(D::Error::custom),
        }
    }
}
