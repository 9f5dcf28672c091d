use crate::error::CheckpointError;
use engine_core::state::CheckpointStore;
use model::{
    core::identifiers::{ChunkId, OperationId, RunKey},
    execution::checkpoint::Checkpoint,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Checkpoint bookkeeping for one operation. Callers commit a chunk only
/// after its records have been written.
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn CheckpointStore>,
    operation_id: OperationId,
    run_key: RunKey,
}

impl StateManager {
    pub fn new(store: Arc<dyn CheckpointStore>, operation_id: OperationId, run_key: RunKey) -> Self {
        Self {
            store,
            operation_id,
            run_key,
        }
    }

    pub fn run_key(&self) -> &RunKey {
        &self.run_key
    }

    /// Chunks already durable under this run key.
    pub async fn completed_chunks(&self) -> Result<HashSet<ChunkId>, CheckpointError> {
        self.store
            .load(&self.run_key)
            .await
            .map_err(CheckpointError::Load)
    }

    /// Returns `false` when an earlier run had already checkpointed the chunk.
    pub async fn commit_chunk(
        &self,
        chunk_id: &ChunkId,
        records_written: u64,
    ) -> Result<bool, CheckpointError> {
        let checkpoint = Checkpoint::new(
            self.operation_id.clone(),
            self.run_key.clone(),
            chunk_id.clone(),
            records_written,
        );

        match self.store.commit(&checkpoint).await {
            Ok(true) => {
                debug!(chunk_id = %chunk_id, records_written, "Checkpoint committed");
                Ok(true)
            }
            Ok(false) => {
                warn!(chunk_id = %chunk_id, "Chunk was already checkpointed, keeping original entry");
                Ok(false)
            }
            Err(source) => Err(CheckpointError::Commit {
                chunk_id: chunk_id.clone(),
                source,
            }),
        }
    }
}
