//! Prometheus text exposition of geofence metrics

use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format a metrics summary in Prometheus text exposition format
///
/// Expects a [`Metrics::snapshot`](crate::infra::metrics::Metrics::snapshot)
/// summary so counters and buckets stay monotonic across scrapes.
pub fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "geofence_reports_total",
        "Position reports evaluated",
        MetricType::Counter,
        site,
        summary.reports_total,
    );
    write_metric(
        &mut output,
        "geofence_reports_rejected_total",
        "Position reports dropped as non-finite or out of range",
        MetricType::Counter,
        site,
        summary.reports_rejected,
    );
    write_metric(
        &mut output,
        "geofence_reports_dropped_total",
        "Position reports dropped due to a full ingest queue",
        MetricType::Counter,
        site,
        summary.reports_dropped,
    );
    write_metric(
        &mut output,
        "geofence_reports_malformed_total",
        "Location payloads that failed to parse",
        MetricType::Counter,
        site,
        summary.reports_malformed,
    );

    let _ = writeln!(output, "# HELP geofence_transitions_total Fence transitions by state");
    let _ = writeln!(output, "# TYPE geofence_transitions_total counter");
    for (state, val) in [
        ("entered", summary.entered_total),
        ("exited", summary.exited_total),
        ("dwell", summary.dwell_total),
    ] {
        let _ = writeln!(
            output,
            "geofence_transitions_total{{site=\"{site}\",state=\"{state}\"}} {val}"
        );
    }

    write_metric(
        &mut output,
        "geofence_events_dropped_total",
        "Event deliveries dropped on a full subscriber queue",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
    write_metric(
        &mut output,
        "geofence_fences",
        "Fences currently registered",
        MetricType::Gauge,
        site,
        summary.fence_count as u64,
    );
    write_metric(
        &mut output,
        "geofence_subscribers",
        "Current event subscribers",
        MetricType::Gauge,
        site,
        summary.subscriber_count as u64,
    );
    write_histogram(
        &mut output,
        "geofence_eval_latency_us",
        "Per-report evaluation latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.lat_sum_us,
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FenceState;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_report_processed(15);
        metrics.record_report_processed(25);
        metrics.record_event_published(FenceState::Dwell);

        let output = format_prometheus_metrics(&metrics.snapshot(3, 1), "truck-7");

        assert!(output.contains("geofence_reports_total{site=\"truck-7\"} 2"));
        assert!(output.contains("geofence_transitions_total{site=\"truck-7\",state=\"dwell\"} 1"));
        assert!(output.contains("geofence_fences{site=\"truck-7\"} 3"));
        assert!(output.contains("geofence_subscribers{site=\"truck-7\"} 1"));
        assert!(output.contains("geofence_eval_latency_us_bucket{site=\"truck-7\",le=\"+Inf\"} 2"));
        assert!(output.contains("geofence_eval_latency_us_count{site=\"truck-7\"} 2"));
        assert!(output.contains("geofence_eval_latency_us_sum{site=\"truck-7\"} 40"));
    }

    #[test]
    fn test_repeated_scrapes_stay_cumulative() {
        let metrics = Metrics::new();
        metrics.record_report_processed(15);

        let first = format_prometheus_metrics(&metrics.snapshot(0, 0), "site");
        metrics.report(0, 0);
        metrics.record_report_processed(15);
        let second = format_prometheus_metrics(&metrics.snapshot(0, 0), "site");

        assert!(first.contains("geofence_eval_latency_us_bucket{site=\"site\",le=\"20\"} 1"));
        assert!(second.contains("geofence_eval_latency_us_bucket{site=\"site\",le=\"20\"} 2"));
        assert!(second.contains("geofence_eval_latency_us_count{site=\"site\"} 2"));
    }
}
