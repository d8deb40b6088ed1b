use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    builds: AtomicUsize,
    queries: AtomicUsize,

    // Timing (in microseconds)
    total_build_time_us: AtomicU64,
    total_query_time_us: AtomicU64,

    // Counts
    total_chunks_processed: AtomicUsize,
    total_entities_built: AtomicUsize,
    total_text_units_built: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            total_build_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
            total_chunks_processed: AtomicUsize::new(0),
            total_entities_built: AtomicUsize::new(0),
            total_text_units_built: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_build(&self, duration: Duration, stats: &index::BuildStats) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.total_build_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_chunks_processed.fetch_add(stats.chunks, Ordering::Relaxed);
        self.total_entities_built.fetch_add(stats.entities, Ordering::Relaxed);
        self.total_text_units_built.fetch_add(stats.text_units, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            avg_build_time_ms: avg_time_ms(&self.total_build_time_us, &self.builds),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            total_chunks_processed: self.total_chunks_processed.load(Ordering::Relaxed),
            total_entities_built: self.total_entities_built.load(Ordering::Relaxed),
            total_text_units_built: self.total_text_units_built.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub builds: usize,
    pub queries: usize,
    pub avg_build_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub total_chunks_processed: usize,
    pub total_entities_built: usize,
    pub total_text_units_built: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
