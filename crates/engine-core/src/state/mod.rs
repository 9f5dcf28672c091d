use crate::error::StateStoreError;
use async_trait::async_trait;
use model::{
    core::identifiers::{ChunkId, OperationId, RunKey},
    execution::{checkpoint::Checkpoint, operation::SyncOperation},
};
use std::collections::HashSet;

pub mod memory;
pub mod sled_store;

/// Durable record of which chunks are written, plus operation snapshots.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Appends a checkpoint and flushes it before returning.
    ///
    /// Returns `false` when the chunk was already checkpointed; the original
    /// entry is kept.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<bool, StateStoreError>;

    async fn is_completed(&self, run_key: &RunKey, chunk_id: &ChunkId)
    -> Result<bool, StateStoreError>;

    /// Every chunk id checkpointed under the run key, in no particular order.
    async fn load(&self, run_key: &RunKey) -> Result<HashSet<ChunkId>, StateStoreError>;

    async fn checkpoints(&self, run_key: &RunKey) -> Result<Vec<Checkpoint>, StateStoreError>;

    async fn save_operation(&self, operation: &SyncOperation) -> Result<(), StateStoreError>;

    async fn load_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<SyncOperation>, StateStoreError>;

    /// Most recently created operations first.
    async fn list_operations(&self, limit: usize) -> Result<Vec<SyncOperation>, StateStoreError>;
}

pub(crate) fn newest_first(mut operations: Vec<SyncOperation>, limit: usize) -> Vec<SyncOperation> {
    operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    operations.truncate(limit);
    operations
}
