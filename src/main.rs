#![allow(clippy::result_large_err)]

use anyhow::Context;
use imagery_bridge::config::ServiceConfig;
use imagery_bridge::telemetry;
use imagery_bridge::translator::{build_url, validate, RequestRecord};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

enum CliCommand {
    Run { config_path: Option<PathBuf> },
    CheckConfig { config_path: Option<PathBuf> },
    Url {
        config_path: Option<PathBuf>,
        record: String,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run { config_path } => run_service(config_path.as_deref()).await,
        CliCommand::CheckConfig { config_path } => check_config(config_path.as_deref()),
        CliCommand::Url {
            config_path,
            record,
        } => print_url(config_path.as_deref(), &record),
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

#[cfg(feature = "rabbitmq")]
async fn run_service(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = ServiceConfig::load_from(config_path).context("failed to load configuration")?;

    let service = imagery_bridge::app::ImageryService::initialise(config)
        .await
        .context("failed to construct service")?;

    service.run().await.context("service runtime error")
}

#[cfg(not(feature = "rabbitmq"))]
async fn run_service(_config_path: Option<&Path>) -> anyhow::Result<()> {
    anyhow::bail!("imagery-bridge was built without the `rabbitmq` feature; cannot run the service")
}

fn check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = ServiceConfig::load_from(config_path).context("failed to load configuration")?;
    config.validate().context("configuration is invalid")?;
    let settings = config.settings()?;

    println!("operation type: {}", settings.mode);
    println!("endpoint:       {}", settings.base_url());
    println!("input pipe:     {}", config.pipeline.input_pipe);
    println!("output pipes:   {}", config.pipeline.output_pipes.join(","));
    Ok(())
}

fn print_url(config_path: Option<&Path>, raw: &str) -> anyhow::Result<()> {
    let config = ServiceConfig::load_from(config_path).context("failed to load configuration")?;
    let settings = config.settings()?;

    let value: JsonValue = serde_json::from_str(raw).context("record must be valid JSON")?;
    let record = RequestRecord::from_json(value)?;
    validate(settings.mode, &record)?;

    println!("{}", build_url(&settings, &record));
    Ok(())
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run { config_path: None });
    };

    match first.as_str() {
        "check-config" => {
            let config_path = args.next().map(PathBuf::from);
            if let Some(extra) = args.next() {
                anyhow::bail!("unrecognised argument `{extra}`");
            }
            return Ok(CliCommand::CheckConfig { config_path });
        }
        "url" => return parse_url_args(args),
        _ => {}
    }

    let mut config_path = None;
    let mut pending = Some(first);

    loop {
        let arg = match pending.take() {
            Some(value) => value,
            None => match args.next() {
                Some(value) => value,
                None => break,
            },
        };

        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(PathBuf::from(value));
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { config_path })
}

fn parse_url_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut record = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(PathBuf::from(value));
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other if record.is_none() => record = Some(other.to_string()),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    let Some(record) = record else {
        anyhow::bail!("imagery-bridge url requires a JSON record");
    };

    Ok(CliCommand::Url {
        config_path,
        record,
    })
}

fn print_help() {
    println!(
        "\
Usage: imagery-bridge [OPTIONS]
       imagery-bridge check-config [<PATH>]
       imagery-bridge url [-c <PATH>] <JSON>

Options:
  -c, --config <PATH>    Configuration file (defaults to config/local)
  -h, --help             Print this help message

Commands:
  check-config           Load and validate configuration, then print the endpoint
  url                    Print the request URL for a JSON record without calling it

Environment:
  IMAGERY__IMAGERY__API_KEY, IMAGERY__PIPELINE__INPUT_PIPE, ...
  BROKER, INPUT_PIPE, OUTPUT_PIPES, LOGGERS, EXCEPTION_LOGGERS, CONFIG
"
    );
}
