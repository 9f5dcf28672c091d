use crate::execution::chunk_task::{ChunkOutcome, ChunkTask};
use chrono::Utc;
use engine_core::state::CheckpointStore;
use model::{
    core::identifiers::ChunkId,
    events::SyncEvent,
    execution::{
        chunk::Chunk,
        operation::{SyncOperation, SyncStatus},
    },
    records::failure::ValidationFailure,
};
use parking_lot::RwLock;
use std::{sync::Arc, time::Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Rejections beyond this many per chunk are summarized in one error entry.
const MAX_REJECTIONS_RECORDED: usize = 20;

/// Owns the operation for its whole run. Dispatches chunks to at most
/// `workers` concurrent tasks and folds their outcomes back in.
pub struct OperationDriver {
    pub operation: SyncOperation,
    pub chunks: Vec<Chunk>,
    pub task: Arc<ChunkTask>,
    pub workers: usize,
    pub store: Arc<dyn CheckpointStore>,
    pub snapshot: Arc<RwLock<Option<SyncOperation>>>,
}

impl OperationDriver {
    pub async fn run(mut self) -> SyncOperation {
        let started = Instant::now();
        let cancel = self.task.cancel.clone();
        let halt_on_critical = self.operation.options.halt_on_critical_failure;
        let workers = self.workers.max(1);

        info!(
            operation_id = %self.operation.operation_id,
            pending = self.chunks.len(),
            workers,
            "Launching workers"
        );

        let mut queue = std::mem::take(&mut self.chunks).into_iter();
        let mut in_flight: JoinSet<ChunkOutcome> = JoinSet::new();
        let mut halted = false;

        loop {
            while !halted && !cancel.is_cancelled() && in_flight.len() < workers {
                let Some(chunk) = queue.next() else { break };
                let task = self.task.clone();
                in_flight.spawn(async move { task.run(chunk).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let failed = match joined {
                Ok(outcome) => self.apply(outcome),
                Err(err) => {
                    error!(error = %err, "Chunk worker crashed");
                    self.operation.progress.chunks_failed += 1;
                    self.operation
                        .record_error(None, format!("chunk worker crashed: {err}"));
                    true
                }
            };

            if failed && halt_on_critical && !halted {
                halted = true;
                warn!(
                    operation_id = %self.operation.operation_id,
                    in_flight = in_flight.len(),
                    "Critical chunk failure, draining in-flight chunks"
                );
                self.operation
                    .record_error(None, "halted after a critical chunk failure");
            }

            self.publish_progress();
            self.persist().await;
        }

        self.finish(cancel.is_cancelled(), started).await
    }

    /// Returns true when the chunk failed.
    fn apply(&mut self, outcome: ChunkOutcome) -> bool {
        let operation_id = self.operation.operation_id.clone();
        let progress = &mut self.operation.progress;

        match outcome {
            ChunkOutcome::Done {
                chunk_id,
                records_fetched,
                records_written,
                skipped_duplicates,
                rejected,
                duration,
            } => {
                progress.chunks_completed += 1;
                progress.records_processed += records_fetched;
                progress.records_succeeded += records_written + skipped_duplicates;
                progress.records_failed += rejected.len() as u64;
                progress.skipped_duplicates += skipped_duplicates;
                self.task.metrics.increment_chunks_completed();

                info!(
                    chunk_id = %chunk_id,
                    records_written,
                    skipped_duplicates,
                    rejected = rejected.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Chunk completed"
                );
                self.task.events.publish(SyncEvent::ChunkCompleted {
                    operation_id,
                    chunk_id: chunk_id.clone(),
                    records_written,
                    skipped_duplicates,
                    records_failed: rejected.len() as u64,
                    duration_ms: duration.as_millis() as u64,
                    timestamp: Utc::now(),
                });
                self.record_rejections(&chunk_id, &rejected);
                false
            }
            ChunkOutcome::Failed {
                chunk_id,
                error,
                records_fetched,
                records_failed,
                rejected,
            } => {
                progress.chunks_failed += 1;
                progress.records_processed += records_fetched;
                progress.records_failed += records_failed;
                self.task.metrics.increment_chunks_failed();

                let message = error.to_string();
                self.task.events.publish(SyncEvent::ChunkFailed {
                    operation_id,
                    chunk_id: chunk_id.clone(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                self.operation.record_error(Some(chunk_id.clone()), message);
                self.record_rejections(&chunk_id, &rejected);
                true
            }
            ChunkOutcome::Aborted { chunk_id } => {
                info!(chunk_id = %chunk_id, "Chunk aborted by cancellation");
                self.task.events.publish(SyncEvent::ChunkAborted {
                    operation_id,
                    chunk_id,
                    timestamp: Utc::now(),
                });
                false
            }
        }
    }

    fn record_rejections(&mut self, chunk_id: &ChunkId, rejected: &[ValidationFailure]) {
        for failure in rejected.iter().take(MAX_REJECTIONS_RECORDED) {
            self.operation
                .record_error(Some(chunk_id.clone()), format!("rejected {failure}"));
        }
        if rejected.len() > MAX_REJECTIONS_RECORDED {
            self.operation.record_error(
                Some(chunk_id.clone()),
                format!(
                    "{} more records rejected",
                    rejected.len() - MAX_REJECTIONS_RECORDED
                ),
            );
        }
    }

    fn publish_progress(&self) {
        let progress = self.operation.progress;
        self.task.events.publish(SyncEvent::Progress {
            operation_id: self.operation.operation_id.clone(),
            progress,
            percentage: progress.percent(),
            timestamp: Utc::now(),
        });
    }

    async fn persist(&self) {
        *self.snapshot.write() = Some(self.operation.clone());
        if let Err(err) = self.store.save_operation(&self.operation).await {
            warn!(operation_id = %self.operation.operation_id, error = %err, "Failed to persist operation");
        }
    }

    async fn finish(mut self, cancelled: bool, started: Instant) -> SyncOperation {
        let progress = self.operation.progress;
        let status = if cancelled {
            SyncStatus::Cancelled
        } else if progress.chunks_failed == 0 && progress.chunks_completed == progress.total_chunks
        {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };

        if let Err(err) = self.operation.transition(status) {
            warn!(operation_id = %self.operation.operation_id, error = %err, "Ignoring final transition");
        }
        self.persist().await;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            operation_id = %self.operation.operation_id,
            status = %self.operation.status,
            chunks_completed = progress.chunks_completed,
            chunks_failed = progress.chunks_failed,
            records_succeeded = progress.records_succeeded,
            duration_ms,
            "Sync operation finished"
        );
        self.task.events.publish(SyncEvent::OperationFinished {
            operation_id: self.operation.operation_id.clone(),
            status: self.operation.status,
            progress,
            error_count: self.operation.total_errors(),
            duration_ms,
            timestamp: Utc::now(),
        });

        self.operation
    }
}
