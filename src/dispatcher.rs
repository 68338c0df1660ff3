use crate::metrics::metrics;
use crate::translator::{ErrorKind, RequestRecord, RequestTranslator, TranslateError, Translation};
use crate::transport::{ErrorReport, PipelineHost, RESULT_LOG_TITLE};
use serde_json::{json, Value as JsonValue};

/// What happened to one consumed record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Published,
    /// Metadata-only static map result, deliberately not forwarded.
    Withheld,
    Reported(ErrorKind),
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Published => "published",
            RecordOutcome::Withheld => "withheld",
            RecordOutcome::Reported(kind) => kind.as_str(),
        }
    }
}

/// Runs one message body through the translator and hands the outcome to the
/// host: a published result, or exactly one error report.
pub async fn process_record(
    translator: &RequestTranslator,
    host: &dyn PipelineHost,
    payload: &[u8],
) -> RecordOutcome {
    metrics().inc_records_received();

    let data = match serde_json::from_slice::<JsonValue>(payload) {
        Ok(value) => value,
        Err(err) => {
            let report = ErrorReport::new(
                ErrorKind::Validation,
                format!("record is not valid JSON: {err}"),
                JsonValue::String(String::from_utf8_lossy(payload).into_owned()),
            )
            .with_rule("record-json");
            return report_failure(host, report).await;
        }
    };

    let record = match RequestRecord::from_json(data.clone()) {
        Ok(record) => record,
        Err(err) => {
            let report = ErrorReport::new(ErrorKind::Validation, err.to_string(), data)
                .with_rule(err.rule());
            return report_failure(host, report).await;
        }
    };

    match translator.translate(&record).await {
        Ok(Translation::Publish(result)) => match host.pipe(&data, &result).await {
            Ok(()) => {
                metrics().inc_results_published();
                tracing::info!(
                    target: "imagery_bridge::dispatcher",
                    event = "result_published",
                    mode = %translator.mode()
                );
                host.log(&json!({
                    "title": RESULT_LOG_TITLE,
                    "data": data,
                    "result": result,
                }))
                .await;
                RecordOutcome::Published
            }
            Err(err) => {
                let report = ErrorReport::new(ErrorKind::Publish, err.to_string(), data);
                report_failure(host, report).await
            }
        },
        Ok(Translation::Withheld(_)) => {
            metrics().inc_results_withheld();
            tracing::warn!(
                target: "imagery_bridge::dispatcher",
                event = "result_withheld",
                mode = %translator.mode(),
                "metadata result not published"
            );
            RecordOutcome::Withheld
        }
        Err(err) => report_failure(host, report_for(err, data)).await,
    }
}

fn report_for(err: TranslateError, data: JsonValue) -> ErrorReport {
    let report = ErrorReport::new(err.kind(), err.to_string(), data);
    match &err {
        TranslateError::Validation(validation) => report.with_rule(validation.rule()),
        _ => report,
    }
}

async fn report_failure(host: &dyn PipelineHost, report: ErrorReport) -> RecordOutcome {
    metrics().inc_report(report.kind.as_str());
    tracing::debug!(
        target: "imagery_bridge::dispatcher",
        event = "record_failed",
        kind = %report.kind,
        error = %report.message
    );
    host.log_exception(&report).await;
    RecordOutcome::Reported(report.kind)
}
