use crate::{error::ProgressError, state::CheckpointStore};
use chrono::{DateTime, Utc};
use model::{
    core::identifiers::OperationId,
    execution::operation::{SyncOperation, SyncStatus},
};
use serde::Serialize;
use std::{fmt, sync::Arc};

#[derive(Clone)]
pub struct ProgressService {
    pub store: Arc<dyn CheckpointStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStage {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Queued => "Queued",
            ProgressStage::Running => "Running",
            ProgressStage::Done => "Done",
            ProgressStage::Failed => "Failed",
            ProgressStage::Cancelled => "Cancelled",
        }
    }
}

impl From<SyncStatus> for ProgressStage {
    fn from(status: SyncStatus) -> Self {
        match status {
            SyncStatus::Pending => ProgressStage::Queued,
            SyncStatus::InProgress => ProgressStage::Running,
            SyncStatus::Completed => ProgressStage::Done,
            SyncStatus::Failed => ProgressStage::Failed,
            SyncStatus::Cancelled => ProgressStage::Cancelled,
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    pub operation_id: OperationId,
    pub stage: ProgressStage,
    pub percent: f64,
    pub total_chunks: u64,
    /// Chunks durably checkpointed under the operation's run key, by any run.
    pub checkpointed_chunks: u64,
    pub records_written: u64,
    pub error_count: usize,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        ProgressService { store }
    }

    pub async fn operation_status(
        &self,
        operation_id: &OperationId,
    ) -> Result<ProgressStatus, ProgressError> {
        let operation = self
            .store
            .load_operation(operation_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(operation_id.to_string()))?;

        self.status_of(&operation).await
    }

    pub async fn status_of(&self, operation: &SyncOperation) -> Result<ProgressStatus, ProgressError> {
        let checkpoints = self.store.checkpoints(&operation.run_key).await?;
        let records_written = checkpoints.iter().map(|cp| cp.records_written).sum();
        let last_checkpoint_at = checkpoints.iter().map(|cp| cp.completed_at).max();

        Ok(ProgressStatus {
            operation_id: operation.operation_id.clone(),
            stage: operation.status.into(),
            percent: operation.progress.percent(),
            total_chunks: operation.progress.total_chunks,
            checkpointed_chunks: checkpoints.len() as u64,
            records_written,
            error_count: operation.total_errors(),
            last_checkpoint_at,
        })
    }
}
