//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting swaps the periodic counters.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only;
//! do not use them for coordination or logic decisions.

use crate::domain::types::FenceState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total position reports evaluated (monotonic)
    reports_total: AtomicU64,
    /// Reports since last report() (reset on report)
    reports_since_report: AtomicU64,
    /// Sum of evaluation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max evaluation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Evaluation latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Lifetime latency histogram, read by snapshot()
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    latency_sum_total_us: AtomicU64,
    latency_max_total_us: AtomicU64,
    /// Reports dropped as non-finite or out of range (monotonic)
    reports_rejected: AtomicU64,
    /// Reports dropped because the ingest channel was full (monotonic)
    reports_dropped: AtomicU64,
    /// Location payloads that failed to parse (monotonic)
    reports_malformed: AtomicU64,
    entered_total: AtomicU64,
    exited_total: AtomicU64,
    dwell_total: AtomicU64,
    /// Per-subscriber deliveries dropped on a full queue (monotonic)
    events_dropped: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reports_total: AtomicU64::new(0),
            reports_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            latency_max_total_us: AtomicU64::new(0),
            reports_rejected: AtomicU64::new(0),
            reports_dropped: AtomicU64::new(0),
            reports_malformed: AtomicU64::new(0),
            entered_total: AtomicU64::new(0),
            exited_total: AtomicU64::new(0),
            dwell_total: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
            started_at: Instant::now(),
        }
    }

    /// Record an evaluated report with its evaluation latency
    #[inline]
    pub fn record_report_processed(&self, latency_us: u64) {
        self.reports_total.fetch_add(1, Ordering::Relaxed);
        self.reports_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);

        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets_total[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_total_us, latency_us);
    }

    #[inline]
    pub fn record_report_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_report_dropped(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_report_malformed(&self) {
        self.reports_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transition handed to the dispatcher
    #[inline]
    pub fn record_event_published(&self, state: FenceState) {
        let counter = match state {
            FenceState::Entered => &self.entered_total,
            FenceState::Exited => &self.exited_total,
            FenceState::Dwell => &self.dwell_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_events_dropped(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reports_total(&self) -> u64 {
        self.reports_total.load(Ordering::Relaxed)
    }

    pub fn reports_rejected(&self) -> u64 {
        self.reports_rejected.load(Ordering::Relaxed)
    }

    pub fn reports_dropped(&self) -> u64 {
        self.reports_dropped.load(Ordering::Relaxed)
    }

    pub fn reports_malformed(&self) -> u64 {
        self.reports_malformed.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Lifetime totals without touching the periodic counters
    ///
    /// For readers other than the periodic logger (Prometheus scrape, MQTT
    /// egress). Histogram buckets are cumulative since startup.
    pub fn snapshot(&self, fence_count: usize, subscriber_count: usize) -> MetricsSummary {
        let mut lat_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.latency_buckets_total.iter().enumerate() {
            lat_buckets[i] = bucket.load(Ordering::Relaxed);
        }
        let count: u64 = lat_buckets.iter().sum();
        let latency_sum = self.latency_sum_total_us.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs_f64();

        self.summary(
            lat_buckets,
            latency_sum,
            if count > 0 { latency_sum / count } else { 0 },
            self.latency_max_total_us.load(Ordering::Relaxed),
            if uptime > 0.0 { count as f64 / uptime } else { 0.0 },
            fence_count,
            subscriber_count,
        )
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self, fence_count: usize, subscriber_count: usize) -> MetricsSummary {
        let reports_count = self.reports_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let reports_per_sec = if elapsed.as_secs_f64() > 0.0 {
            reports_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if reports_count > 0 { latency_sum / reports_count } else { 0 };

        self.summary(
            lat_buckets,
            latency_sum,
            avg_latency,
            max_latency,
            reports_per_sec,
            fence_count,
            subscriber_count,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn summary(
        &self,
        lat_buckets: [u64; NUM_BUCKETS],
        lat_sum_us: u64,
        avg_eval_latency_us: u64,
        max_eval_latency_us: u64,
        reports_per_sec: f64,
        fence_count: usize,
        subscriber_count: usize,
    ) -> MetricsSummary {
        MetricsSummary {
            reports_total: self.reports_total.load(Ordering::Relaxed),
            reports_per_sec,
            avg_eval_latency_us,
            max_eval_latency_us,
            lat_buckets,
            lat_sum_us,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            reports_malformed: self.reports_malformed.load(Ordering::Relaxed),
            entered_total: self.entered_total.load(Ordering::Relaxed),
            exited_total: self.exited_total.load(Ordering::Relaxed),
            dwell_total: self.dwell_total.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            fence_count,
            subscriber_count,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub reports_total: u64,
    pub reports_per_sec: f64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_sum_us: u64,
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub reports_rejected: u64,
    pub reports_dropped: u64,
    pub reports_malformed: u64,
    pub entered_total: u64,
    pub exited_total: u64,
    pub dwell_total: u64,
    pub events_dropped: u64,
    pub fence_count: usize,
    pub subscriber_count: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            reports_total = %self.reports_total,
            reports_per_sec = format!("{:.1}", self.reports_per_sec),
            avg_latency_us = %self.avg_eval_latency_us,
            max_latency_us = %self.max_eval_latency_us,
            p99_us = %self.lat_p99_us,
            rejected = %self.reports_rejected,
            dropped = %self.reports_dropped,
            entered = %self.entered_total,
            exited = %self.exited_total,
            dwell = %self.dwell_total,
            fences = %self.fence_count,
            subscribers = %self.subscriber_count,
            "metrics"
        );
    }
}
