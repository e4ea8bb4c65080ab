//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::RecognitionSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Recognizer latency bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, >2560
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Per-recognizer latency histogram (reset on report)
struct LatencyHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ms: AtomicU64::new(0),
            max_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(&self, latency_ms: u64) {
        self.buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.max_ms, latency_ms);
    }

    fn take(&self) -> LatencySummary {
        let buckets = swap_buckets(&self.buckets);
        let sum = self.sum_ms.swap(0, Ordering::Relaxed);
        let max_ms = self.max_ms.swap(0, Ordering::Relaxed);
        Self::summarize(buckets, sum, max_ms)
    }

    fn peek(&self) -> LatencySummary {
        let buckets = std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed));
        let sum = self.sum_ms.load(Ordering::Relaxed);
        let max_ms = self.max_ms.load(Ordering::Relaxed);
        Self::summarize(buckets, sum, max_ms)
    }

    fn summarize(buckets: [u64; NUM_BUCKETS], sum: u64, max_ms: u64) -> LatencySummary {
        let count: u64 = buckets.iter().sum();
        LatencySummary {
            buckets,
            count,
            sum_ms: sum,
            avg_ms: if count > 0 { sum / count } else { 0 },
            max_ms,
            p50_ms: percentile_from_buckets(&buckets, 0.50),
            p99_ms: percentile_from_buckets(&buckets, 0.99),
        }
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic values to get a snapshot.
pub struct Metrics {
    /// Frames pushed by the camera (monotonic)
    frames_submitted: AtomicU64,
    /// Frames replaced in the feed before analysis (monotonic)
    frames_superseded: AtomicU64,
    /// Frames discarded because the session was paused or done (monotonic)
    frames_discarded: AtomicU64,
    /// Frames that went through analysis (reset on report)
    frames_since_report: AtomicU64,
    /// Barcode recognizer invocations (monotonic)
    barcode_calls: AtomicU64,
    /// OCR recognizer invocations (monotonic)
    ocr_calls: AtomicU64,
    /// OCR calls skipped by the throttle (monotonic)
    ocr_throttled: AtomicU64,
    /// Recognizer calls that returned an error (monotonic)
    recognizer_failures: AtomicU64,
    /// Accepted identifiers by source (monotonic)
    accepted_barcode: AtomicU64,
    accepted_ocr: AtomicU64,
    accepted_manual: AtomicU64,
    /// Valid identifiers that arrived after the session already accepted one
    late_completions: AtomicU64,
    /// Manual entries rejected as invalid (monotonic)
    manual_rejected: AtomicU64,
    /// Frame releases that failed (monotonic)
    release_failures: AtomicU64,
    /// Sessions failed by the release monitor (monotonic)
    pipeline_failures: AtomicU64,
    barcode_latency: LatencyHistogram,
    ocr_latency: LatencyHistogram,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_submitted: AtomicU64::new(0),
            frames_superseded: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            barcode_calls: AtomicU64::new(0),
            ocr_calls: AtomicU64::new(0),
            ocr_throttled: AtomicU64::new(0),
            recognizer_failures: AtomicU64::new(0),
            accepted_barcode: AtomicU64::new(0),
            accepted_ocr: AtomicU64::new(0),
            accepted_manual: AtomicU64::new(0),
            late_completions: AtomicU64::new(0),
            manual_rejected: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
            pipeline_failures: AtomicU64::new(0),
            barcode_latency: LatencyHistogram::new(),
            ocr_latency: LatencyHistogram::new(),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_superseded(&self) {
        self.frames_superseded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_analyzed(&self) {
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a barcode recognizer call and its latency
    #[inline]
    pub fn record_barcode_call(&self, latency_ms: u64) {
        self.barcode_calls.fetch_add(1, Ordering::Relaxed);
        self.barcode_latency.record(latency_ms);
    }

    /// Record an OCR recognizer call and its latency
    #[inline]
    pub fn record_ocr_call(&self, latency_ms: u64) {
        self.ocr_calls.fetch_add(1, Ordering::Relaxed);
        self.ocr_latency.record(latency_ms);
    }

    #[inline]
    pub fn record_ocr_throttled(&self) {
        self.ocr_throttled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognizer_failure(&self) {
        self.recognizer_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_accepted(&self, source: RecognitionSource) {
        let counter = match source {
            RecognitionSource::Barcode => &self.accepted_barcode,
            RecognitionSource::Ocr => &self.accepted_ocr,
            RecognitionSource::Manual => &self.accepted_manual,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_late_completion(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_manual_rejected(&self) {
        self.manual_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pipeline_failure(&self) {
        self.pipeline_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_superseded(&self) -> u64 {
        self.frames_superseded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn barcode_calls(&self) -> u64 {
        self.barcode_calls.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ocr_calls(&self) -> u64 {
        self.ocr_calls.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn late_completions(&self) -> u64 {
        self.late_completions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn release_failures(&self) -> u64 {
        self.release_failures.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let barcode_latency = self.barcode_latency.take();
        let ocr_latency = self.ocr_latency.take();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summary(frames_count, elapsed, barcode_latency, ocr_latency)
    }

    /// Same as `report()` but leaves periodic counters untouched (for scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.load(Ordering::Relaxed);
        let elapsed = self.last_report_time.lock().elapsed();
        self.summary(frames_count, elapsed, self.barcode_latency.peek(), self.ocr_latency.peek())
    }

    fn summary(
        &self,
        frames_count: u64,
        elapsed: Duration,
        barcode_latency: LatencySummary,
        ocr_latency: LatencySummary,
    ) -> MetricsSummary {
        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_per_sec,
            barcode_calls: self.barcode_calls.load(Ordering::Relaxed),
            ocr_calls: self.ocr_calls.load(Ordering::Relaxed),
            ocr_throttled: self.ocr_throttled.load(Ordering::Relaxed),
            recognizer_failures: self.recognizer_failures.load(Ordering::Relaxed),
            accepted_barcode: self.accepted_barcode.load(Ordering::Relaxed),
            accepted_ocr: self.accepted_ocr.load(Ordering::Relaxed),
            accepted_manual: self.accepted_manual.load(Ordering::Relaxed),
            late_completions: self.late_completions.load(Ordering::Relaxed),
            manual_rejected: self.manual_rejected.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            pipeline_failures: self.pipeline_failures.load(Ordering::Relaxed),
            barcode_latency,
            ocr_latency,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

/// Snapshot of one recognizer's latency histogram
#[derive(Debug, Clone, Copy)]
pub struct LatencySummary {
    /// Bounds: ≤5, ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, >2560 ms
    pub buckets: [u64; NUM_BUCKETS],
    pub count: u64,
    pub sum_ms: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_submitted: u64,
    pub frames_superseded: u64,
    pub frames_discarded: u64,
    pub frames_per_sec: f64,
    pub barcode_calls: u64,
    pub ocr_calls: u64,
    pub ocr_throttled: u64,
    pub recognizer_failures: u64,
    pub accepted_barcode: u64,
    pub accepted_ocr: u64,
    pub accepted_manual: u64,
    pub late_completions: u64,
    pub manual_rejected: u64,
    pub release_failures: u64,
    pub pipeline_failures: u64,
    pub barcode_latency: LatencySummary,
    pub ocr_latency: LatencySummary,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_submitted = %self.frames_submitted,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            frames_superseded = %self.frames_superseded,
            frames_discarded = %self.frames_discarded,
            barcode_calls = %self.barcode_calls,
            barcode_p99_ms = %self.barcode_latency.p99_ms,
            ocr_calls = %self.ocr_calls,
            ocr_p99_ms = %self.ocr_latency.p99_ms,
            accepted = %(self.accepted_barcode + self.accepted_ocr + self.accepted_manual),
            late_completions = %self.late_completions,
            release_failures = %self.release_failures,
            "metrics"
        );
    }
}
