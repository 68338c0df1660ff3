use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{
    HttpDurationSnapshot, HttpMetricsSnapshot, HttpRequestCountSnapshot, RuntimeCountersSnapshot,
};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.counters.http_metrics_snapshot()
    }

    pub fn inc_records_received(&self) {
        self.counters.inc_records_received();
    }

    pub fn inc_results_published(&self) {
        self.counters.inc_results_published();
    }

    pub fn inc_results_withheld(&self) {
        self.counters.inc_results_withheld();
    }

    /// Counts one error report; `kind` is one of the report kind labels.
    pub fn inc_report(&self, kind: &str) {
        self.counters.inc_report(kind);
    }

    pub fn inc_broker_publish_success(&self) {
        self.counters.inc_broker_publish_success();
    }

    pub fn inc_broker_publish_failure(&self) {
        self.counters.inc_broker_publish_failure();
    }

    pub fn inc_records_inflight(&self) {
        self.counters.inc_records_inflight();
    }

    pub fn dec_records_inflight(&self) {
        self.counters.dec_records_inflight();
    }

    pub fn record_http_request(&self, endpoint: &str, status: u16, duration: Duration) {
        self.counters.record_http_request(endpoint, status, duration);
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}

/// One outbound endpoint's request statistics, ready for a log line.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpEndpointSummary {
    pub endpoint: String,
    pub requests: u64,
    /// `status:count` pairs in status order, comma separated.
    pub statuses: String,
    pub mean_ms: f64,
    /// Upper bound of the latency bucket holding the 95th percentile; `None`
    /// when it falls above the largest bucket.
    pub p95_le_secs: Option<f64>,
}

pub fn summarize_http(http: &HttpMetricsSnapshot) -> Vec<HttpEndpointSummary> {
    http.durations
        .iter()
        .map(|duration| {
            let statuses = http
                .requests
                .iter()
                .filter(|entry| entry.endpoint == duration.endpoint)
                .map(|entry| format!("{}:{}", entry.status_code, entry.total))
                .collect::<Vec<_>>()
                .join(",");
            let mean_ms = if duration.count == 0 {
                0.0
            } else {
                duration.sum * 1000.0 / duration.count as f64
            };
            HttpEndpointSummary {
                endpoint: duration.endpoint.clone(),
                requests: duration.count,
                statuses,
                mean_ms,
                p95_le_secs: percentile_bound(duration, 0.95),
            }
        })
        .collect()
}

fn percentile_bound(duration: &HttpDurationSnapshot, quantile: f64) -> Option<f64> {
    if duration.count == 0 {
        return None;
    }
    let rank = (duration.count as f64 * quantile).ceil() as u64;
    duration
        .buckets
        .iter()
        .find(|(_, cumulative)| *cumulative >= rank)
        .map(|(bound, _)| *bound)
}

/// Logs the service counters followed by one line per outbound endpoint.
pub fn log_summary() {
    let collector = metrics();
    let counters = collector.snapshot();
    tracing::info!(
        target: "imagery_bridge::metrics",
        event = "service_counters",
        received = counters.records_received,
        published = counters.results_published,
        withheld = counters.results_withheld,
        validation_reports = counters.validation_reports,
        transport_reports = counters.transport_reports,
        upstream_reports = counters.upstream_reports,
        publish_reports = counters.publish_reports,
        broker_publish_failure = counters.broker_publish_failure
    );

    for summary in summarize_http(&collector.http_metrics_snapshot()) {
        let p95 = summary
            .p95_le_secs
            .map(|bound| format!("{}ms", bound * 1000.0))
            .unwrap_or_else(|| "+Inf".to_string());
        tracing::info!(
            target: "imagery_bridge::metrics",
            event = "http_endpoint_summary",
            endpoint = %summary.endpoint,
            requests = summary.requests,
            statuses = %summary.statuses,
            mean_ms = summary.mean_ms,
            p95_le = %p95
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration(
        endpoint: &str,
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    ) -> HttpDurationSnapshot {
        HttpDurationSnapshot {
            endpoint: endpoint.to_string(),
            buckets,
            sum,
            count,
        }
    }

    #[test]
    fn summarizes_statuses_and_latency_per_endpoint() {
        let http = HttpMetricsSnapshot {
            requests: vec![
                HttpRequestCountSnapshot {
                    endpoint: "StaticMap".to_string(),
                    status_code: 200,
                    total: 19,
                },
                HttpRequestCountSnapshot {
                    endpoint: "StaticMap".to_string(),
                    status_code: 401,
                    total: 1,
                },
            ],
            durations: vec![duration(
                "StaticMap",
                vec![(0.05, 10), (0.1, 18), (0.25, 20), (0.5, 20)],
                2.0,
                20,
            )],
        };

        let summaries = summarize_http(&http);
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.endpoint, "StaticMap");
        assert_eq!(summary.requests, 20);
        assert_eq!(summary.statuses, "200:19,401:1");
        assert!((summary.mean_ms - 100.0).abs() < 1e-9);
        assert_eq!(summary.p95_le_secs, Some(0.25));
    }

    #[test]
    fn slow_tail_has_no_bucket_bound() {
        let http = HttpMetricsSnapshot {
            requests: Vec::new(),
            durations: vec![duration("ImageryMetadata", vec![(0.01, 0), (10.0, 1)], 30.0, 2)],
        };

        assert_eq!(summarize_http(&http)[0].p95_le_secs, None);
    }
}
