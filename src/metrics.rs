//! Prometheus-style metrics for the data pipeline
//!
//! Counters, gauges and histograms with text export. [`DataMetrics`] bundles
//! the series a data manager maintains and is shared via `Arc` between the
//! foreground caller and prefetch workers.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Name and help text shared by every series kind
struct Series {
    name: &'static str,
    help: &'static str,
}

impl Series {
    fn header(&self, kind: &str) -> String {
        format!("# HELP {0} {1}\n# TYPE {0} {2}\n", self.name, self.help, kind)
    }
}

/// Monotonic counter
pub struct Counter {
    series: Series,
    value: AtomicU64,
}

impl Counter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            series: Series { name, help },
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = self.series.header("counter");
        let _ = writeln!(out, "{} {}", self.series.name, self.get());
        out
    }
}

/// Last-written value
pub struct Gauge {
    series: Series,
    value: AtomicI64,
}

impl Gauge {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            series: Series { name, help },
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = self.series.header("gauge");
        let _ = writeln!(out, "{} {}", self.series.name, self.get());
        out
    }
}

/// Upper bounds, in seconds, of the wait histogram buckets
const WAIT_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0];

/// Cumulative histogram of durations in seconds
pub struct Histogram {
    series: Series,
    bounds: Vec<f64>,
    state: Mutex<HistogramState>,
}

#[derive(Default)]
struct HistogramState {
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_bounds(name, help, WAIT_BUCKETS.to_vec())
    }

    pub fn with_bounds(name: &'static str, help: &'static str, bounds: Vec<f64>) -> Self {
        let state = HistogramState {
            buckets: vec![0; bounds.len()],
            ..Default::default()
        };
        Self {
            series: Series { name, help },
            bounds,
            state: Mutex::new(state),
        }
    }

    pub fn observe(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += seconds;
        for (bound, bucket) in self.bounds.iter().zip(state.buckets.iter_mut()) {
            if seconds <= *bound {
                *bucket += 1;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn to_prometheus(&self) -> String {
        let name = self.series.name;
        let mut out = self.series.header("histogram");
        let state = self.state.lock();
        for (bound, bucket) in self.bounds.iter().zip(&state.buckets) {
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, bucket);
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, state.count);
        let _ = writeln!(out, "{}_sum {}", name, state.sum);
        let _ = writeln!(out, "{}_count {}", name, state.count);
        out
    }
}

/// Metrics maintained by a data manager.
///
/// Skipped files are the observable trace of per-file read failures, which
/// never abort a batch on their own.
pub struct DataMetrics {
    pub files_read: Counter,
    pub files_skipped: Counter,
    pub batches_served: Counter,
    pub refill_rounds: Counter,
    pub current_epoch: Gauge,
    pub refill_wait: Histogram,
    // most recent skip reasons, newest last
    recent_skips: Mutex<VecDeque<String>>,
}

/// How many skip reasons are retained for inspection
const RECENT_SKIPS_CAPACITY: usize = 32;

impl DataMetrics {
    pub fn new() -> Self {
        Self {
            files_read: Counter::new("facedata_files_read_total", "Files decoded successfully"),
            files_skipped: Counter::new(
                "facedata_files_skipped_total",
                "Files skipped after a read or decode failure",
            ),
            batches_served: Counter::new(
                "facedata_batches_served_total",
                "Batches handed to callers",
            ),
            refill_rounds: Counter::new(
                "facedata_refill_rounds_total",
                "Background prefetch rounds launched",
            ),
            current_epoch: Gauge::new(
                "facedata_train_epoch",
                "Completed passes over the train split",
            ),
            refill_wait: Histogram::new(
                "facedata_refill_wait_seconds",
                "Time callers blocked joining a prefetch worker",
            ),
            recent_skips: Mutex::new(VecDeque::with_capacity(RECENT_SKIPS_CAPACITY)),
        }
    }

    /// Record a skipped file along with the reason
    pub fn record_skip(&self, reason: String) {
        self.files_skipped.inc();
        let mut recent = self.recent_skips.lock();
        if recent.len() == RECENT_SKIPS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(reason);
    }

    /// Reasons for the most recent skips, oldest first
    pub fn recent_skips(&self) -> Vec<String> {
        self.recent_skips.lock().iter().cloned().collect()
    }

    /// Every series in Prometheus text format
    pub fn export(&self) -> String {
        [
            self.files_read.to_prometheus(),
            self.files_skipped.to_prometheus(),
            self.batches_served.to_prometheus(),
            self.refill_rounds.to_prometheus(),
            self.current_epoch.to_prometheus(),
            self.refill_wait.to_prometheus(),
        ]
        .concat()
    }
}

impl Default for DataMetrics {
    fn default() -> Self {
        Self::new()
    }
}
