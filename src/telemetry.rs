use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "imagery-bridge";
const DEFAULT_FILTER: &str = "imagery_bridge=info,info";
const HTTP_DURATION_BUCKETS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter)
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// Emits one `key=value` line per event: fixed prefix, message, then the
/// event fields in name order.
struct KeyValueFormatter;

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let mut line = LogLine::default();
        line.field("ts", &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            .field("level", metadata.level().as_str())
            .field("service", SERVICE_NAME)
            .field("component", metadata.target())
            .field("pid", &std::process::id().to_string())
            .field("msg", fields.message.as_deref().unwrap_or(metadata.name()));
        for (name, value) in &fields.values {
            line.field(name, value);
        }

        writeln!(writer, "{}", line.finish())
    }
}

#[derive(Default)]
struct LogLine {
    buffer: String,
}

impl LogLine {
    fn field(&mut self, key: &str, value: &str) -> &mut Self {
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(key);
        self.buffer.push('=');
        if needs_quoting(value) {
            self.buffer.push_str(&quote(value));
        } else {
            self.buffer.push_str(value);
        }
        self
    }

    fn finish(self) -> String {
        self.buffer
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || "\"\\=[]{},".contains(c))
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    values: BTreeMap<&'static str, String>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name, value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    records_received: AtomicU64,
    results_published: AtomicU64,
    results_withheld: AtomicU64,
    validation_reports: AtomicU64,
    transport_reports: AtomicU64,
    upstream_reports: AtomicU64,
    publish_reports: AtomicU64,
    broker_publish_success: AtomicU64,
    broker_publish_failure: AtomicU64,
    records_inflight: AtomicU64,
    http_requests: HttpRequestMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub records_received: u64,
    pub results_published: u64,
    pub results_withheld: u64,
    pub validation_reports: u64,
    pub transport_reports: u64,
    pub upstream_reports: u64,
    pub publish_reports: u64,
    pub broker_publish_success: u64,
    pub broker_publish_failure: u64,
    pub records_inflight: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestCountSnapshot {
    pub endpoint: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpDurationSnapshot {
    pub endpoint: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpMetricsSnapshot {
    pub requests: Vec<HttpRequestCountSnapshot>,
    pub durations: Vec<HttpDurationSnapshot>,
}

/// Per-endpoint request counts by status plus a latency histogram.
#[derive(Default)]
struct HttpRequestMetrics {
    endpoints: Mutex<BTreeMap<String, EndpointStats>>,
}

#[derive(Default)]
struct EndpointStats {
    statuses: BTreeMap<u16, u64>,
    latency: LatencyHistogram,
}

impl HttpRequestMetrics {
    fn record(&self, endpoint: &str, status: u16, duration: Duration) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = endpoints.entry(endpoint.to_string()).or_default();
        *stats.statuses.entry(status).or_insert(0) += 1;
        stats.latency.observe(duration.as_secs_f64());
    }

    fn snapshot(&self) -> HttpMetricsSnapshot {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = HttpMetricsSnapshot {
            requests: Vec::new(),
            durations: Vec::with_capacity(endpoints.len()),
        };

        for (endpoint, stats) in endpoints.iter() {
            snapshot
                .requests
                .extend(stats.statuses.iter().map(|(status, total)| {
                    HttpRequestCountSnapshot {
                        endpoint: endpoint.clone(),
                        status_code: *status,
                        total: *total,
                    }
                }));
            snapshot.durations.push(HttpDurationSnapshot {
                endpoint: endpoint.clone(),
                buckets: stats.latency.cumulative(),
                sum: stats.latency.sum,
                count: stats.latency.count,
            });
        }

        snapshot
    }
}

#[derive(Default)]
struct LatencyHistogram {
    buckets: [u64; HTTP_DURATION_BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl LatencyHistogram {
    fn observe(&mut self, secs: f64) {
        let slot = HTTP_DURATION_BUCKETS.partition_point(|bound| *bound < secs);
        if let Some(bucket) = self.buckets.get_mut(slot) {
            *bucket += 1;
        }
        self.sum += secs;
        self.count += 1;
    }

    /// Prometheus style: every bucket counts the observations at or below its bound.
    fn cumulative(&self) -> Vec<(f64, u64)> {
        HTTP_DURATION_BUCKETS
            .iter()
            .zip(self.buckets.iter())
            .scan(0, |running, (bound, hits)| {
                *running += hits;
                Some((*bound, *running))
            })
            .collect()
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_records_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_results_published(&self) {
        self.results_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_results_withheld(&self) {
        self.results_withheld.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_report(&self, kind: &str) {
        let counter = match kind {
            "validation" => &self.validation_reports,
            "transport" => &self.transport_reports,
            "upstream" => &self.upstream_reports,
            _ => &self.publish_reports,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_broker_publish_success(&self) {
        self.broker_publish_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_broker_publish_failure(&self) {
        self.broker_publish_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_inflight(&self) {
        self.records_inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_records_inflight(&self) {
        let _ = self.records_inflight.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| (current > 0).then_some(current - 1),
        );
    }

    pub fn record_http_request(&self, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests.record(endpoint, status, duration);
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_requests.snapshot()
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            results_published: self.results_published.load(Ordering::Relaxed),
            results_withheld: self.results_withheld.load(Ordering::Relaxed),
            validation_reports: self.validation_reports.load(Ordering::Relaxed),
            transport_reports: self.transport_reports.load(Ordering::Relaxed),
            upstream_reports: self.upstream_reports.load(Ordering::Relaxed),
            publish_reports: self.publish_reports.load(Ordering::Relaxed),
            broker_publish_success: self.broker_publish_success.load(Ordering::Relaxed),
            broker_publish_failure: self.broker_publish_failure.load(Ordering::Relaxed),
            records_inflight: self.records_inflight.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_values_that_would_break_parsing() {
        let mut line = LogLine::default();
        line.field("pipe", "imagery.out")
            .field("error", "missing locator: centerPoint, ma")
            .field("empty", "")
            .field("detail", "a\"b");

        assert_eq!(
            line.finish(),
            "pipe=imagery.out error=\"missing locator: centerPoint, ma\" empty=\"\" detail=\"a\\\"b\""
        );
    }

    #[test]
    fn event_fields_are_kept_in_name_order() {
        let mut fields = EventFields::default();
        fields.values.insert("pipe", "in".to_string());
        fields.values.insert("event", "record_received".to_string());

        let names: Vec<_> = fields.values.keys().copied().collect();
        assert_eq!(names, vec!["event", "pipe"]);
    }

    #[test]
    fn latency_buckets_are_cumulative() {
        let mut histogram = LatencyHistogram::default();
        histogram.observe(0.02);
        histogram.observe(0.3);
        histogram.observe(20.0);

        let buckets = histogram.cumulative();
        assert_eq!(buckets[0], (0.01, 0));
        assert_eq!(buckets[1], (0.025, 1));
        assert_eq!(buckets[5], (0.5, 2));
        assert_eq!(buckets[9], (10.0, 2));
        assert_eq!(histogram.count, 3);
    }

    #[test]
    fn http_snapshot_groups_statuses_by_endpoint() {
        let metrics = HttpRequestMetrics::default();
        metrics.record("StaticMap", 200, Duration::from_millis(40));
        metrics.record("StaticMap", 401, Duration::from_millis(20));
        metrics.record("StaticMap", 200, Duration::from_millis(60));

        let snapshot = metrics.snapshot();
        let statuses: Vec<_> = snapshot
            .requests
            .iter()
            .map(|entry| (entry.status_code, entry.total))
            .collect();
        assert_eq!(statuses, vec![(200, 2), (401, 1)]);
        assert_eq!(snapshot.durations[0].count, 3);
    }
}
