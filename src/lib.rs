#![allow(clippy::result_large_err)]

#[cfg(feature = "rabbitmq")]
pub mod app;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod translator;

pub mod transport;
