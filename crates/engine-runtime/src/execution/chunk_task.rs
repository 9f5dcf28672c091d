use engine_core::{event_bus::bus::EventBus, metrics::Metrics};
use engine_processing::{
    error::ChunkError,
    fetcher::ChunkFetcher,
    state_manager::StateManager,
    validation::{RecordValidator, ValidationContext},
    writer::BatchWriter,
};
use chrono::Utc;
use model::{
    core::identifiers::{ChunkId, OperationId},
    events::SyncEvent,
    execution::chunk::{Chunk, ChunkState},
    records::failure::ValidationFailure,
};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one chunk ended. Sent back to the driver, which owns the operation.
#[derive(Debug)]
pub enum ChunkOutcome {
    Done {
        chunk_id: ChunkId,
        records_fetched: u64,
        records_written: u64,
        skipped_duplicates: u64,
        rejected: Vec<ValidationFailure>,
        duration: Duration,
    },
    Failed {
        chunk_id: ChunkId,
        error: ChunkError,
        records_fetched: u64,
        records_failed: u64,
        rejected: Vec<ValidationFailure>,
    },
    /// Cancellation was observed before the write began.
    Aborted { chunk_id: ChunkId },
}

impl ChunkOutcome {
    pub fn chunk_id(&self) -> &ChunkId {
        match self {
            ChunkOutcome::Done { chunk_id, .. }
            | ChunkOutcome::Failed { chunk_id, .. }
            | ChunkOutcome::Aborted { chunk_id } => chunk_id,
        }
    }
}

/// Everything a worker needs to run fetch, validate, write and checkpoint
/// for a single chunk. Shared by all workers of one operation.
pub struct ChunkTask {
    pub operation_id: OperationId,
    pub fetcher: ChunkFetcher,
    pub validator: RecordValidator,
    pub writer: BatchWriter,
    pub state: StateManager,
    pub events: EventBus,
    pub metrics: Metrics,
    pub cancel: CancellationToken,
    pub batch_size: usize,
}

impl ChunkTask {
    pub async fn run(&self, mut chunk: Chunk) -> ChunkOutcome {
        let chunk_id = chunk.chunk_id.clone();
        if self.cancel.is_cancelled() {
            return ChunkOutcome::Aborted { chunk_id };
        }

        let started = Instant::now();
        self.events.publish(SyncEvent::ChunkStarted {
            operation_id: self.operation_id.clone(),
            chunk_id: chunk_id.clone(),
            timestamp: Utc::now(),
        });

        advance(&mut chunk, ChunkState::Fetching);
        let records = match self.fetcher.fetch(&chunk, self.batch_size).await {
            Ok(records) => records,
            Err(err) => {
                advance(&mut chunk, ChunkState::Failed);
                warn!(chunk_id = %chunk_id, attempts = chunk.attempts, error = %err, "Chunk fetch failed");
                return ChunkOutcome::Failed {
                    chunk_id,
                    error: err.into(),
                    records_fetched: 0,
                    records_failed: 0,
                    rejected: Vec::new(),
                };
            }
        };
        let records_fetched = records.len() as u64;

        advance(&mut chunk, ChunkState::Validating);
        let ctx = ValidationContext {
            school_id: chunk.school_id.clone(),
            date_range: chunk.date_range,
        };
        let report = self.validator.validate_batch(&records, &ctx);
        drop(records);
        self.metrics
            .increment_validation_failures(report.failures.len() as u64);
        if !report.failures.is_empty() {
            info!(
                chunk_id = %chunk_id,
                valid = report.valid.len(),
                rejected = report.failures.len(),
                "Rejected records in chunk"
            );
        }

        if self.cancel.is_cancelled() {
            debug!(chunk_id = %chunk_id, "Cancellation observed before write");
            return ChunkOutcome::Aborted { chunk_id };
        }

        advance(&mut chunk, ChunkState::Writing);
        let summary = match self
            .writer
            .write_in_batches(&report.valid, self.batch_size)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                advance(&mut chunk, ChunkState::Failed);
                warn!(chunk_id = %chunk_id, error = %err, "Chunk write failed, not checkpointing");
                return ChunkOutcome::Failed {
                    chunk_id,
                    error: err.into(),
                    records_fetched,
                    records_failed: records_fetched,
                    rejected: report.failures,
                };
            }
        };

        let durable = summary.written + summary.skipped_duplicates;
        if let Err(err) = self.state.commit_chunk(&chunk_id, durable).await {
            advance(&mut chunk, ChunkState::Failed);
            warn!(chunk_id = %chunk_id, error = %err, "Chunk written but checkpoint failed");
            return ChunkOutcome::Failed {
                chunk_id,
                error: err.into(),
                records_fetched,
                records_failed: report.failures.len() as u64,
                rejected: report.failures,
            };
        }

        advance(&mut chunk, ChunkState::Done);
        ChunkOutcome::Done {
            chunk_id,
            records_fetched,
            records_written: summary.written,
            skipped_duplicates: summary.skipped_duplicates,
            rejected: report.failures,
            duration: started.elapsed(),
        }
    }
}

fn advance(chunk: &mut Chunk, next: ChunkState) {
    if let Err(err) = chunk.advance(next) {
        warn!(chunk_id = %chunk.chunk_id, error = %err, "Ignoring chunk transition");
    }
}
