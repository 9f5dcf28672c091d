use crate::{
    error::WriteError,
    guard::{Guarded, call_guarded},
    retry::classify_datastore_error,
};
use connectors::{
    datastore::{AttendanceRepository, UpsertSummary},
    error::DatastoreError,
};
use engine_core::{
    circuit_breaker::CircuitBreaker,
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
};
use model::records::attendance::{AttendanceKey, ValidatedRecord};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{debug, warn};

/// Writes validated records through the attendance repository with retry and
/// the `datastore` breaker in front of every transaction.
#[derive(Clone)]
pub struct BatchWriter {
    repository: Arc<dyn AttendanceRepository>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
}

impl BatchWriter {
    pub fn new(
        repository: Arc<dyn AttendanceRepository>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        metrics: Metrics,
    ) -> Self {
        Self {
            repository,
            retry,
            breaker,
            metrics,
        }
    }

    /// Upserts all records as one transaction.
    pub async fn write_batch(&self, records: &[ValidatedRecord]) -> Result<UpsertSummary, WriteError> {
        let (unique, collapsed) = collapse_duplicates(records);
        self.write_unique(&unique, collapsed).await
    }

    /// Collapses duplicate keys across the whole set, then writes it in
    /// transactions of at most `batch_size` rows.
    pub async fn write_in_batches(
        &self,
        records: &[ValidatedRecord],
        batch_size: usize,
    ) -> Result<UpsertSummary, WriteError> {
        let (unique, collapsed) = collapse_duplicates(records);
        let mut summary = UpsertSummary {
            written: 0,
            skipped_duplicates: collapsed,
        };

        for slice in unique.chunks(batch_size.max(1)) {
            summary.merge(self.write_unique(slice, 0).await?);
        }
        Ok(summary)
    }

    async fn write_unique(
        &self,
        records: &[ValidatedRecord],
        collapsed: u64,
    ) -> Result<UpsertSummary, WriteError> {
        if records.is_empty() {
            return Ok(UpsertSummary {
                written: 0,
                skipped_duplicates: collapsed,
            });
        }

        let started = Instant::now();
        let repository = &self.repository;
        let result = call_guarded(
            &self.retry,
            &self.breaker,
            &self.metrics,
            classify_datastore_error,
            move || async move { repository.upsert_attendance_batch(records).await },
        )
        .await;

        match result {
            Ok(mut summary) => {
                summary.skipped_duplicates += collapsed;
                self.metrics.increment_records_written(summary.written);
                self.metrics.increment_duplicates(summary.skipped_duplicates);
                debug!(
                    rows = records.len(),
                    written = summary.written,
                    skipped = summary.skipped_duplicates,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Batch written"
                );
                Ok(summary)
            }
            Err(err) => {
                let err = into_write_error(err);
                warn!(rows = records.len(), error = %err, "Batch write failed");
                Err(err)
            }
        }
    }
}

fn into_write_error(err: RetryError<Guarded<DatastoreError>>) -> WriteError {
    match err {
        RetryError::Fatal(Guarded::Open(open))
        | RetryError::Exhausted {
            last: Guarded::Open(open),
            ..
        } => WriteError::CircuitOpen(open),
        RetryError::Fatal(Guarded::Call(err)) => WriteError::Fatal(err),
        RetryError::Exhausted {
            attempts,
            last: Guarded::Call(last),
        } => WriteError::RetriesExhausted { attempts, last },
    }
}

/// Keeps the last record seen for each key, in first-seen order. Returns
/// how many records were dropped.
fn collapse_duplicates(records: &[ValidatedRecord]) -> (Vec<ValidatedRecord>, u64) {
    let mut positions: HashMap<AttendanceKey, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<ValidatedRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.key()) {
            Some(&at) => unique[at] = record.clone(),
            None => {
                positions.insert(record.key(), unique.len());
                unique.push(record.clone());
            }
        }
    }

    let collapsed = (records.len() - unique.len()) as u64;
    (unique, collapsed)
}
