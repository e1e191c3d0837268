use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ahash::AHashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::element::{SampleEvent, SampleListener};
use crate::sample::SampleResult;

/// Aggregates sample results per label.
///
/// Elapsed times are recorded in microseconds; summaries report milliseconds.
#[derive(Debug, Default)]
pub struct Summariser {
    labels: Mutex<AHashMap<Arc<str>, LabelStats>>,
}

#[derive(Debug)]
struct LabelStats {
    samples: u64,
    errors: u64,
    bytes_received: u64,
    elapsed_us: Histogram<u64>,
    first_start: SystemTime,
    last_end: SystemTime,
}

impl LabelStats {
    fn new(first_start: SystemTime) -> Self {
        Self {
            samples: 0,
            errors: 0,
            bytes_received: 0,
            elapsed_us: new_latency_histogram(),
            first_start,
            last_end: first_start,
        }
    }

    fn record(&mut self, result: &SampleResult) {
        self.samples += 1;
        if !result.is_success() {
            self.errors += 1;
        }
        self.bytes_received = self.bytes_received.saturating_add(result.bytes_received());
        let micros = u64::try_from(result.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.elapsed_us.saturating_record(micros.max(1));
        self.first_start = self.first_start.min(result.start_time());
        self.last_end = self.last_end.max(result.end_time());
    }

    fn merge(&mut self, other: &LabelStats) {
        self.samples += other.samples;
        self.errors += other.errors;
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
        // Both sides share the bounds of `new_latency_histogram` and saturate into them.
        if let Err(err) = self.elapsed_us.add(&other.elapsed_us) {
            warn!(error = %err, "failed to merge latency histograms");
        }
        self.first_start = self.first_start.min(other.first_start);
        self.last_end = self.last_end.max(other.last_end);
    }

    fn summarize(&self, label: &str) -> LabelSummary {
        let h = &self.elapsed_us;
        let has = !h.is_empty();
        let ms = |us: u64| us as f64 / 1000.0;
        let window = self
            .last_end
            .duration_since(self.first_start)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();

        LabelSummary {
            label: label.to_string(),
            samples: self.samples,
            errors: self.errors,
            error_rate: if self.samples > 0 {
                self.errors as f64 / self.samples as f64
            } else {
                0.0
            },
            min_ms: has.then(|| ms(h.min())),
            max_ms: has.then(|| ms(h.max())),
            mean_ms: has.then(|| h.mean() / 1000.0),
            p50_ms: has.then(|| ms(h.value_at_quantile(0.50))),
            p90_ms: has.then(|| ms(h.value_at_quantile(0.90))),
            p95_ms: has.then(|| ms(h.value_at_quantile(0.95))),
            p99_ms: has.then(|| ms(h.value_at_quantile(0.99))),
            bytes_received: self.bytes_received,
            throughput_per_sec: (window > 0.0).then(|| self.samples as f64 / window),
        }
    }
}

/// 1us .. 1h, 3 significant digits. Constant bounds with `high >= 2 * low` and a sigfig in
/// `0..=5` are always accepted, so creation cannot fail.
fn new_latency_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

impl Summariser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: &SampleResult) {
        let mut labels = self.labels.lock();
        if let Some(stats) = labels.get_mut(result.label()) {
            stats.record(result);
            return;
        }
        let mut stats = LabelStats::new(result.start_time());
        stats.record(result);
        labels.insert(Arc::from(result.label()), stats);
    }

    /// Per-label summaries sorted by label, plus the total over all labels.
    pub fn snapshot(&self) -> Summary {
        let labels = self.labels.lock();

        let mut names: Vec<&Arc<str>> = labels.keys().collect();
        names.sort();

        let mut total: Option<LabelStats> = None;
        let mut per_label = Vec::with_capacity(names.len());
        for name in names {
            let Some(stats) = labels.get(name) else {
                continue;
            };
            per_label.push(stats.summarize(name));
            total
                .get_or_insert_with(|| LabelStats::new(stats.first_start))
                .merge(stats);
        }

        Summary {
            total: total
                .map(|t| t.summarize("TOTAL"))
                .unwrap_or_else(|| LabelStats::new(SystemTime::now()).summarize("TOTAL")),
            labels: per_label,
        }
    }
}

impl SampleListener for Summariser {
    fn sample_occurred(&self, event: &SampleEvent) {
        self.record(&event.result);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: LabelSummary,
    pub labels: Vec<LabelSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSummary {
    pub label: String,
    pub samples: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub bytes_received: u64,
    /// Samples per second between the first start and the last end.
    pub throughput_per_sec: Option<f64>,
}
