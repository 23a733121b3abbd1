//! Statistics for a bulk-create call.
//!
//! Success and failure counts, per-record latency, and throughput, recorded
//! concurrently by creation tasks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Statistics tracker for one batch.
#[derive(Debug)]
pub struct StatsTracker {
    /// Start time of the batch.
    start_time: Instant,
    /// Records finished, either way.
    total_processed: AtomicU64,
    /// Records created.
    success_count: AtomicU64,
    /// Records that failed.
    failure_count: AtomicU64,
    /// Total latency of successful records in microseconds.
    total_latency_us: AtomicU64,
    /// Slowest successful record in microseconds.
    max_latency_us: AtomicU64,
    /// Completions in the last second.
    recent: Mutex<VecDeque<Instant>>,
    /// Size of the batch.
    total_records: AtomicUsize,
}

impl StatsTracker {
    /// Create a tracker for a batch of `total_records`.
    pub fn new(total_records: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_processed: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            max_latency_us: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            total_records: AtomicUsize::new(total_records),
        }
    }

    /// Record a created record.
    pub fn record_success(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
        self.record_recent();
    }

    /// Record a failed record.
    pub fn record_failure(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.record_recent();
    }

    fn record_recent(&self) {
        let now = Instant::now();
        let mut recent = self.recent.lock();
        recent.push_back(now);
        prune(&mut recent, now);
    }

    /// Completions per second over the last second.
    pub fn recent_rate(&self) -> f64 {
        let mut recent = self.recent.lock();
        prune(&mut recent, Instant::now());
        recent.len() as f64
    }

    /// Get the current statistics snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.elapsed();
        let total = self.total_processed.load(Ordering::Relaxed);
        let success = self.success_count.load(Ordering::Relaxed);
        let failure = self.failure_count.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let max_latency = self.max_latency_us.load(Ordering::Relaxed);

        let avg_latency_ms = if success > 0 {
            (total_latency as f64 / success as f64) / 1000.0
        } else {
            0.0
        };

        let overall_rps = if elapsed.as_secs_f64() > 0.0 {
            total as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        StatsSnapshot {
            elapsed,
            total_records: self.total_records.load(Ordering::Relaxed),
            total_processed: total,
            success_count: success,
            failure_count: failure,
            avg_latency_ms,
            max_latency_ms: max_latency as f64 / 1000.0,
            current_rps: self.recent_rate(),
            overall_rps,
        }
    }
}

/// Drop entries older than one second.
fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    let Some(cutoff) = now.checked_sub(Duration::from_secs(1)) else {
        return;
    };
    while recent.front().is_some_and(|front| *front < cutoff) {
        recent.pop_front();
    }
}

/// A snapshot of batch statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Elapsed time since the batch started.
    pub elapsed: Duration,
    /// Size of the batch.
    pub total_records: usize,
    /// Records finished so far.
    pub total_processed: u64,
    /// Records created.
    pub success_count: u64,
    /// Records that failed.
    pub failure_count: u64,
    /// Average latency of created records in milliseconds.
    pub avg_latency_ms: f64,
    /// Slowest created record in milliseconds.
    pub max_latency_ms: f64,
    /// Completions in the last second.
    pub current_rps: f64,
    /// Completions per second since the start.
    pub overall_rps: f64,
}

impl StatsSnapshot {
    /// Get the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_processed > 0 {
            (self.success_count as f64 / self.total_processed as f64) * 100.0
        } else {
            100.0
        }
    }

    /// Format as a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Created: {}/{} | Failed: {} | Avg Latency: {:.1}ms | Max Latency: {:.1}ms | {:.1} rec/s",
            self.success_count,
            self.total_records,
            self.failure_count,
            self.avg_latency_ms,
            self.max_latency_ms,
            self.overall_rps
        )
    }
}
