use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    sis_requests: AtomicU64,
    retries: AtomicU64,
    records_fetched: AtomicU64,
    records_written: AtomicU64,
    skipped_duplicates: AtomicU64,
    validation_failures: AtomicU64,
    chunks_completed: AtomicU64,
    chunks_failed: AtomicU64,
}

/// Process-wide pipeline counters. Cheap to clone; every clone shares the same cells.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub sis_requests: u64,
    pub retries: u64,
    pub records_fetched: u64,
    pub records_written: u64,
    pub skipped_duplicates: u64,
    pub validation_failures: u64,
    pub chunks_completed: u64,
    pub chunks_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_sis_requests(&self) {
        self.inner.sis_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_records_fetched(&self, count: u64) {
        self.inner
            .records_fetched
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_records_written(&self, count: u64) {
        self.inner
            .records_written
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_duplicates(&self, count: u64) {
        self.inner
            .skipped_duplicates
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_validation_failures(&self, count: u64) {
        self.inner
            .validation_failures
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_chunks_completed(&self) {
        self.inner.chunks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks_failed(&self) {
        self.inner.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |cell: &AtomicU64| cell.load(Ordering::Relaxed);
        MetricsSnapshot {
            sis_requests: load(&self.inner.sis_requests),
            retries: load(&self.inner.retries),
            records_fetched: load(&self.inner.records_fetched),
            records_written: load(&self.inner.records_written),
            skipped_duplicates: load(&self.inner.skipped_duplicates),
            validation_failures: load(&self.inner.validation_failures),
            chunks_completed: load(&self.inner.chunks_completed),
            chunks_failed: load(&self.inner.chunks_failed),
        }
    }
}
